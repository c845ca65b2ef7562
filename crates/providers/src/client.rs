//! HTTP transport shared by every wire dialect.
//!
//! [`LlmClient`] posts the dialect's request body, maps HTTP status codes to
//! [`ProviderError`]s, records rate-limit headers, walks the model fallback
//! chain, and hands streaming bodies to the SSE reader task.

use async_trait::async_trait;
use codeclaw_core::error::ProviderError;
use codeclaw_core::provider::{
    ChunkReceiver, DeltaCallback, Provider, ProviderRequest, ProviderResponse, RateLimits, collect_stream,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::fallback::FallbackPolicy;
use crate::ratelimit::retry_after_secs;
use crate::sse;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const STREAM_BUFFER: usize = 64;

/// A provider speaking one [`Dialect`] over HTTP.
pub struct LlmClient {
    name: String,
    base_url: String,
    api_key: String,
    dialect: Arc<dyn Dialect>,
    http: reqwest::Client,
    request_timeout: Duration,
    fallback: FallbackPolicy,
    rate_limits: Mutex<Option<RateLimits>>,
}

impl LlmClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        dialect: Arc<dyn Dialect>,
    ) -> Result<Self, ProviderError> {
        // No client-wide timeout: it would cut long streams short.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            dialect,
            http,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            fallback: FallbackPolicy::default(),
            rate_limits: Mutex::new(None),
        })
    }

    /// Retry failed or timed-out requests against `models`, in order.
    pub fn with_fallback_models(mut self, models: Vec<String>, timeout: Duration) -> Self {
        self.set_fallback_models(models, timeout);
        self
    }

    pub fn set_fallback_models(&mut self, models: Vec<String>, timeout: Duration) {
        self.fallback = FallbackPolicy::new(models, timeout);
    }

    /// Timeout for a whole non-streaming request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn fallback(&self) -> &FallbackPolicy {
        &self.fallback
    }

    fn record_rate_limits(&self, headers: &reqwest::header::HeaderMap) {
        let limits = self.dialect.parse_rate_limits(headers);
        if limits.is_empty() {
            return;
        }
        debug!(
            provider = %self.name,
            remaining_requests = ?limits.remaining_requests,
            remaining_tokens = ?limits.remaining_tokens,
            "Rate limits updated"
        );
        let mut slot = self.rate_limits.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(limits);
    }

    /// POST the request and check the status line.
    async fn send(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let body = self.dialect.build_request_body(request, stream);
        let url = self.dialect.endpoint(&self.base_url);

        debug!(provider = %self.name, model = %request.model, stream, "Sending LLM request");

        let mut builder = self.http.post(&url).json(&body);
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }
        let builder = self.dialect.apply_headers(builder, &self.api_key);

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        self.record_rate_limits(response.headers());

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        let retry_after = retry_after_secs(response.headers());
        let text = response.text().await.unwrap_or_default();
        warn!(provider = %self.name, status = code, "LLM request failed");

        Err(match code {
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after,
            },
            401 | 403 => ProviderError::AuthenticationFailed(text),
            404 => ProviderError::ModelNotFound(request.model.clone()),
            _ => ProviderError::ApiError {
                status_code: code,
                message: text,
            },
        })
    }

    async fn complete_once(&self, mut request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        request.stream = false;
        let response = self.send(&request, false).await?;
        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let mut parsed = self.dialect.parse_response_body(&bytes)?;
        if parsed.model.is_empty() {
            parsed.model = request.model;
        }
        Ok(parsed)
    }

    async fn open_stream(
        &self,
        mut request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceiver, ProviderError> {
        request.stream = true;
        let response = self.send(&request, true).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let body = Box::pin(response.bytes_stream());
        tokio::spawn(sse::pump(self.dialect.clone(), body, tx, cancel.clone()));
        Ok(rx)
    }

    /// One model, start to finish: open the stream and drain it.
    async fn stream_once(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
        on_delta: DeltaCallback<'_>,
    ) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let rx = self.open_stream(request, cancel).await?;
        collect_stream(rx, model, cancel, on_delta).await
    }
}

#[async_trait]
impl Provider for LlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        let primary = request.model.clone();
        self.fallback
            .run(&primary, cancel, |model| {
                let mut request = request.clone();
                request.model = model;
                self.complete_once(request)
            })
            .await
    }

    /// Opening the stream is retried along the fallback chain. Once the
    /// first byte has been handed to the reader task, failures surface on
    /// the channel instead; [`Provider::stream_with_callback`] is the
    /// entry point that retries those too.
    async fn stream(&self, request: ProviderRequest, cancel: &CancellationToken) -> Result<ChunkReceiver, ProviderError> {
        let primary = request.model.clone();
        self.fallback
            .run(&primary, cancel, |model| {
                let mut request = request.clone();
                request.model = model;
                self.open_stream(request, cancel)
            })
            .await
    }

    /// Each model in the fallback chain gets a fresh stream. A malformed
    /// frame, an interrupted body or a timeout discards that model's partial
    /// answer and restarts on the next one; the returned response only
    /// carries the attempt that finished. Cancellation is never retried.
    async fn stream_with_callback(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
        on_delta: DeltaCallback<'_>,
    ) -> Result<ProviderResponse, ProviderError> {
        let primary = request.model.clone();
        let outcome = self
            .fallback
            .run(&primary, cancel, |model| {
                let mut request = request.clone();
                request.model = model;
                self.stream_once(request, cancel, on_delta)
            })
            .await;
        on_delta("", "", true);
        outcome
    }

    fn rate_limits(&self) -> Option<RateLimits> {
        self.rate_limits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.fallback.models().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai_compat::OpenAiDialect;
    use codeclaw_core::message::Message;
    use codeclaw_core::provider::{FinishReason, StreamChunk};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses; `reply` picks one from the request body.
    async fn serve(reply: impl Fn(&str) -> String + Send + Sync + 'static) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reply = Arc::new(reply);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let reply = reply.clone();
                tokio::spawn(async move {
                    let body = read_request_body(&mut socket).await;
                    let _ = socket.write_all(reply(&body).as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/v1")
    }

    async fn read_request_body(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return String::from_utf8_lossy(&buf[end + 4..]).into_owned();
                }
            }
        }
        String::new()
    }

    fn http(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{headers}\r\n{body}",
            body.len()
        )
    }

    fn sse(body: &str) -> String {
        format!("HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}")
    }

    fn completion(text: &str) -> String {
        serde_json::json!({
            "model": "m",
            "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        })
        .to_string()
    }

    fn client(base: String) -> LlmClient {
        LlmClient::new("test", base, "sk-test", Arc::new(OpenAiDialect)).unwrap()
    }

    fn request(model: &str) -> ProviderRequest {
        ProviderRequest::new(model, vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn complete_parses_body_and_rate_limits() {
        let base = serve(|_| {
            http(
                "200 OK",
                "x-ratelimit-remaining-requests: 99\r\nx-ratelimit-reset-requests: 1s\r\n",
                &completion("hello"),
            )
        })
        .await;
        let client = client(base);

        let response = client.complete(request("m"), &CancellationToken::new()).await.unwrap();
        assert_eq!(response.message.content, "hello");
        assert_eq!(response.usage.unwrap().total_tokens, 5);

        let limits = client.rate_limits().unwrap();
        assert_eq!(limits.remaining_requests, Some(99));
        assert!(limits.requests_reset_at.is_some());
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let base = serve(|body| {
            if body.contains("\"limited\"") {
                http("429 Too Many Requests", "retry-after: 7\r\n", "{}")
            } else {
                http("401 Unauthorized", "", "{\"error\":\"bad key\"}")
            }
        })
        .await;
        let client = client(base);

        let err = client.complete(request("limited"), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 7 }));

        let err = client.complete(request("other"), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn fallback_model_used_after_failure() {
        let base = serve(|body| {
            if body.contains("\"primary\"") {
                http("500 Internal Server Error", "", "boom")
            } else {
                http("200 OK", "", &completion("from backup"))
            }
        })
        .await;
        let client = client(base).with_fallback_models(vec!["backup".into()], Duration::from_secs(5));

        let response = client.complete(request("primary"), &CancellationToken::new()).await.unwrap();
        assert_eq!(response.message.content, "from backup");
    }

    #[tokio::test]
    async fn stream_with_callback_assembles_response() {
        let base = serve(|_| {
            sse(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"there\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ))
        })
        .await;
        let client = client(base);

        let deltas = Mutex::new(Vec::new());
        let done = Mutex::new(0);
        let on_delta = |delta: &str, _thinking: &str, is_done: bool| {
            if is_done {
                *done.lock().unwrap() += 1;
            } else {
                deltas.lock().unwrap().push(delta.to_string());
            }
        };

        let response = client
            .stream_with_callback(request("m"), &CancellationToken::new(), &on_delta)
            .await
            .unwrap();
        assert_eq!(response.message.content, "Hi there");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(*deltas.lock().unwrap(), vec!["Hi ", "there"]);
        assert_eq!(*done.lock().unwrap(), 1);
    }

    /// Sends stream headers, then holds the connection open without a body.
    async fn serve_stalled() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request_body(&mut socket).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n")
                .await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(socket);
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn cancelled_stream_closes_channel() {
        let client = client(serve_stalled().await);
        let cancel = CancellationToken::new();

        let mut rx = client.stream(request("m"), &cancel).await.unwrap();
        cancel.cancel();
        let next: Option<Result<StreamChunk, ProviderError>> = rx.recv().await;
        assert!(next.is_none());
    }

    const BACKUP_STREAM: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"from backup\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn done_counter() -> (Arc<Mutex<Vec<String>>>, Arc<Mutex<u32>>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(Mutex::new(0)))
    }

    #[tokio::test]
    async fn malformed_stream_restarts_on_fallback_model() {
        let models = Arc::new(Mutex::new(Vec::new()));
        let seen = models.clone();
        let base = serve(move |body| {
            if body.contains("\"primary\"") {
                seen.lock().unwrap().push("primary");
                sse(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                    "data: {oops\n\n",
                ))
            } else {
                seen.lock().unwrap().push("backup");
                sse(BACKUP_STREAM)
            }
        })
        .await;
        let client = client(base).with_fallback_models(vec!["backup".into()], Duration::from_secs(5));

        let (deltas, done) = done_counter();
        let (d, n) = (deltas.clone(), done.clone());
        let on_delta = move |delta: &str, _: &str, is_done: bool| {
            if is_done {
                *n.lock().unwrap() += 1;
            } else {
                d.lock().unwrap().push(delta.to_string());
            }
        };

        let response = client
            .stream_with_callback(request("primary"), &CancellationToken::new(), &on_delta)
            .await
            .unwrap();
        assert_eq!(response.message.content, "from backup");
        assert_eq!(response.model, "backup");
        assert_eq!(*models.lock().unwrap(), vec!["primary", "backup"]);
        assert_eq!(*deltas.lock().unwrap(), vec!["Hi", "from backup"]);
        assert_eq!(*done.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_stream_without_fallback_is_an_error() {
        let base = serve(|_| sse("data: {oops\n\n")).await;
        let client = client(base);

        let (_, done) = done_counter();
        let n = done.clone();
        let on_delta = move |_: &str, _: &str, is_done: bool| {
            if is_done {
                *n.lock().unwrap() += 1;
            }
        };

        let err = client
            .stream_with_callback(request("m"), &CancellationToken::new(), &on_delta)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedStream(_)));
        assert_eq!(*done.lock().unwrap(), 1);
    }

    /// The primary model stalls after its headers; every other model streams.
    async fn serve_stalled_primary() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let body = read_request_body(&mut socket).await;
                    if body.contains("\"primary\"") {
                        let _ = socket
                            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n")
                            .await;
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    } else {
                        let _ = socket.write_all(sse(BACKUP_STREAM).as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                });
            }
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn stalled_stream_times_out_to_fallback_model() {
        let client = client(serve_stalled_primary().await)
            .with_fallback_models(vec!["backup".into()], Duration::from_millis(300));

        let on_delta = |_: &str, _: &str, _: bool| {};
        let response = client
            .stream_with_callback(request("primary"), &CancellationToken::new(), &on_delta)
            .await
            .unwrap();
        assert_eq!(response.message.content, "from backup");
    }

    #[tokio::test]
    async fn cancelled_stream_is_not_retried() {
        let client = client(serve_stalled_primary().await)
            .with_fallback_models(vec!["backup".into()], Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let (_, done) = done_counter();
        let n = done.clone();
        let on_delta = move |_: &str, _: &str, is_done: bool| {
            if is_done {
                *n.lock().unwrap() += 1;
            }
        };

        let err = client
            .stream_with_callback(request("primary"), &cancel, &on_delta)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(*done.lock().unwrap(), 1);
    }
}

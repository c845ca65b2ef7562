//! Server-sent events: line framing, tool-call reassembly, and the reader
//! task that turns a response body into [`StreamChunk`]s.

use codeclaw_core::error::ProviderError;
use codeclaw_core::message::MessageToolCall;
use codeclaw_core::provider::{FinishReason, StreamChunk, Usage};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::dialect::{Dialect, SseEvent, ToolCallFragment};

/// One `data:` payload with the `event:` name that preceded it.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE line parser.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        self.line(line.trim_end_matches(['\n', '\r'])).into_iter().collect()
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        // Blank line ends an event; comments start with ':'.
        if line.is_empty() {
            self.event = None;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(name) = field(line, "event") {
            self.event = Some(name.to_string());
            return None;
        }
        let data = field(line, "data")?;
        Some(SseFrame {
            event: self.event.clone(),
            data: data.to_string(),
        })
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim_end())
}

/// Reassembles tool calls from fragments, in the order they were opened.
///
/// A fragment with an id opens (or continues) the call with that id. A
/// fragment without an id continues the call registered for its index, opens
/// a new call for an unseen index, and otherwise joins the last opened call.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    calls: Vec<MessageToolCall>,
    by_index: HashMap<u32, usize>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(&mut self, fragment: ToolCallFragment) {
        let slot = if !fragment.id.is_empty() {
            let slot = match self.calls.iter().position(|c| c.id == fragment.id) {
                Some(pos) => pos,
                None => self.open(fragment.id.clone()),
            };
            if let Some(index) = fragment.index {
                self.by_index.insert(index, slot);
            }
            slot
        } else if let Some(index) = fragment.index {
            match self.by_index.get(&index) {
                Some(&slot) => slot,
                None => {
                    let slot = self.open(format!("call_{}", self.calls.len()));
                    self.by_index.insert(index, slot);
                    slot
                }
            }
        } else if let Some(last) = self.calls.len().checked_sub(1) {
            // Continuation deltas may repeat the name; they still belong here.
            last
        } else {
            self.open(format!("call_{}", self.calls.len()))
        };

        let call = &mut self.calls[slot];
        if call.name.is_empty() && !fragment.name.is_empty() {
            call.name = fragment.name;
        }
        call.arguments.push_str(&fragment.arguments);
    }

    fn open(&mut self, id: String) -> usize {
        self.calls.push(MessageToolCall {
            id,
            name: String::new(),
            arguments: String::new(),
        });
        self.calls.len() - 1
    }

    pub fn set_finish_reason(&mut self, reason: FinishReason) {
        self.finish_reason = Some(reason);
    }

    /// Merge usage reported piecewise (prompt at start, completion at end).
    pub fn record_usage(&mut self, usage: Usage) {
        let merged = match self.usage {
            Some(prev) => {
                let prompt = prev.prompt_tokens.max(usage.prompt_tokens);
                let completion = prev.completion_tokens.max(usage.completion_tokens);
                Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: usage.total_tokens.max(prompt + completion),
                }
            }
            None => usage,
        };
        self.usage = Some(merged);
    }

    pub fn tool_calls(&self) -> &[MessageToolCall] {
        &self.calls
    }

    /// The terminal chunk: assembled tool calls, finish reason, usage.
    pub fn finish(self) -> StreamChunk {
        let finish_reason = match self.finish_reason {
            Some(reason) => reason,
            None if !self.calls.is_empty() => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        };
        StreamChunk {
            content: None,
            thinking: None,
            tool_calls: self.calls,
            done: true,
            finish_reason: Some(finish_reason),
            usage: self.usage,
        }
    }
}

enum Step {
    Emit(StreamChunk),
    Continue,
    Done,
}

fn step(dialect: &dyn Dialect, frame: &SseFrame, assembler: &mut StreamAssembler) -> Result<Step, ProviderError> {
    match dialect.parse_sse_data(frame.event.as_deref(), frame.data.trim())? {
        SseEvent::Done => Ok(Step::Done),
        SseEvent::Ignore => Ok(Step::Continue),
        SseEvent::Delta {
            content,
            thinking,
            tool_calls,
            finish_reason,
            usage,
        } => {
            for fragment in tool_calls {
                assembler.push_fragment(fragment);
            }
            if let Some(reason) = finish_reason {
                assembler.set_finish_reason(reason);
            }
            if let Some(usage) = usage {
                assembler.record_usage(usage);
            }
            if content.is_some() || thinking.is_some() {
                Ok(Step::Emit(StreamChunk {
                    content,
                    thinking,
                    ..Default::default()
                }))
            } else {
                Ok(Step::Continue)
            }
        }
    }
}

/// Read an SSE body until it ends, the receiver goes away, or `cancel` fires.
///
/// Deltas are forwarded as they arrive; the final chunk carries the
/// assembled tool calls. Returning drops `body`, which releases the
/// connection on every exit path.
pub async fn pump<S, B, E>(
    dialect: Arc<dyn Dialect>,
    mut body: S,
    tx: mpsc::Sender<Result<StreamChunk, ProviderError>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut parser = SseParser::new();
    let mut assembler = StreamAssembler::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(dialect = dialect.name(), "Stream cancelled, closing body");
                return;
            }
            _ = tx.closed() => {
                trace!("Stream receiver dropped");
                return;
            }
            next = body.next() => next,
        };

        let ended = next.is_none();
        let frames = match next {
            Some(Ok(bytes)) => parser.feed(bytes.as_ref()),
            Some(Err(e)) => {
                let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                return;
            }
            None => parser.finish(),
        };

        for frame in &frames {
            match step(dialect.as_ref(), frame, &mut assembler) {
                Ok(Step::Emit(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                Ok(Step::Continue) => {}
                Ok(Step::Done) => {
                    let _ = tx.send(Ok(assembler.finish())).await;
                    return;
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        if ended {
            // Body ended without an explicit terminator.
            let _ = tx.send(Ok(assembler.finish())).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai_compat::OpenAiDialect;
    use futures::stream;

    fn frag(index: Option<u32>, id: &str, name: &str, args: &str) -> ToolCallFragment {
        ToolCallFragment {
            index,
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[test]
    fn parser_splits_lines_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"a\"").is_empty());
        let frames = parser.feed(b":1}\n\ndata: [DONE]\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[1].data, "[DONE]");
    }

    #[test]
    fn parser_tracks_event_names_and_skips_comments() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b": keep-alive\nevent: message_stop\ndata: {}\n\ndata:{}\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("message_stop"));
        assert_eq!(frames[1].event, None);
        assert_eq!(frames[1].data, "{}");
    }

    #[test]
    fn parser_keeps_split_utf8_intact() {
        let mut parser = SseParser::new();
        let bytes = "data: héllo\n".as_bytes();
        let (a, b) = bytes.split_at(8); // splits the two-byte 'é'
        assert!(parser.feed(a).is_empty());
        let frames = parser.feed(b);
        assert_eq!(frames[0].data, "héllo");
    }

    #[test]
    fn parser_flushes_unterminated_line() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: [DONE]").is_empty());
        assert_eq!(parser.finish()[0].data, "[DONE]");
    }

    #[test]
    fn empty_id_fragments_join_last_opened_call() {
        let mut asm = StreamAssembler::new();
        asm.push_fragment(frag(None, "c1", "read_file", "{\"pa"));
        asm.push_fragment(frag(None, "", "", "th\":"));
        asm.push_fragment(frag(None, "", "", "\"a\"}"));
        let chunk = asm.finish();
        assert_eq!(chunk.tool_calls.len(), 1);
        assert_eq!(chunk.tool_calls[0].id, "c1");
        assert_eq!(chunk.tool_calls[0].arguments, "{\"path\":\"a\"}");
        assert_eq!(chunk.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn repeated_name_without_id_stays_in_the_same_call() {
        let mut asm = StreamAssembler::new();
        asm.push_fragment(frag(None, "c1", "read_file", "{\"pa"));
        asm.push_fragment(frag(None, "", "read_file", "th\":"));
        asm.push_fragment(frag(None, "", "read_file", "\"a\"}"));
        let calls = asm.finish().tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, "{\"path\":\"a\"}");
    }

    #[test]
    fn first_fragment_without_id_opens_a_call() {
        let mut asm = StreamAssembler::new();
        asm.push_fragment(frag(None, "", "shell", "{\"command\":"));
        asm.push_fragment(frag(None, "", "", "\"ls\"}"));
        let calls = asm.finish().tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].name, "shell");
        assert_eq!(calls[0].arguments, "{\"command\":\"ls\"}");
    }

    #[test]
    fn unseen_index_without_id_opens_a_new_call() {
        let mut asm = StreamAssembler::new();
        asm.push_fragment(frag(Some(0), "", "one", "{}"));
        asm.push_fragment(frag(Some(1), "", "two", "{"));
        asm.push_fragment(frag(Some(1), "", "two", "}"));
        let calls = asm.finish().tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "one");
        assert_eq!(calls[1].id, "call_1");
        assert_eq!(calls[1].arguments, "{}");
    }

    #[test]
    fn indexed_fragments_keep_open_order() {
        let mut asm = StreamAssembler::new();
        asm.push_fragment(frag(Some(0), "a", "one", ""));
        asm.push_fragment(frag(Some(1), "b", "two", ""));
        asm.push_fragment(frag(Some(0), "", "", "{\"x\":1}"));
        asm.push_fragment(frag(Some(1), "", "", "{\"y\":2}"));
        let calls = asm.finish().tool_calls;
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].arguments, "{\"x\":1}");
        assert_eq!(calls[1].id, "b");
        assert_eq!(calls[1].arguments, "{\"y\":2}");
    }

    #[test]
    fn usage_merges_prompt_and_completion() {
        let mut asm = StreamAssembler::new();
        asm.record_usage(Usage {
            prompt_tokens: 12,
            completion_tokens: 0,
            total_tokens: 12,
        });
        asm.record_usage(Usage {
            prompt_tokens: 0,
            completion_tokens: 30,
            total_tokens: 30,
        });
        assert_eq!(asm.finish().usage.unwrap().total_tokens, 42);
    }

    async fn collect(body: Vec<&'static str>) -> Vec<Result<StreamChunk, ProviderError>> {
        let (tx, mut rx) = mpsc::channel(64);
        let body = stream::iter(body.into_iter().map(|s| Ok::<_, std::io::Error>(s.as_bytes())));
        pump(Arc::new(OpenAiDialect), body, tx, CancellationToken::new()).await;
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn pump_streams_content_then_assembled_calls() {
        let out = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"path\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"foo.txt\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;

        assert_eq!(out.len(), 3);
        let first = out[0].as_ref().unwrap();
        assert_eq!(first.content.as_deref(), Some("Hel"));
        let last = out[2].as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.tool_calls[0].arguments, "{\"path\":\"foo.txt\"}");
        assert_eq!(last.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn pump_joins_unindexed_fragments_that_repeat_the_name() {
        let out = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"id\":\"c1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"pa\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"function\":{\"name\":\"read_file\",\"arguments\":\"th\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"function\":{\"name\":\"read_file\",\"arguments\":\"\\\"a\\\"}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;

        let last = out.last().unwrap().as_ref().unwrap();
        assert_eq!(last.tool_calls.len(), 1);
        assert_eq!(last.tool_calls[0].id, "c1");
        assert_eq!(last.tool_calls[0].arguments, "{\"path\":\"a\"}");
    }

    #[tokio::test]
    async fn pump_reports_malformed_frames() {
        let out = collect(vec!["data: {oops\n\n"]).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(ProviderError::MalformedStream(_))));
    }

    #[tokio::test]
    async fn pump_finishes_when_body_ends_without_done() {
        let out = collect(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"x\"},\"finish_reason\":\"length\"}]}\n"]).await;
        let last = out.last().unwrap().as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.finish_reason, Some(FinishReason::Length));
    }

    #[tokio::test]
    async fn pump_stops_on_cancel() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body = stream::pending::<Result<&'static [u8], std::io::Error>>();
        pump(Arc::new(OpenAiDialect), body, tx, cancel).await;
        assert!(rx.recv().await.is_none());
    }
}

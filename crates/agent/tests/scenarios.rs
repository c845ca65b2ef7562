//! End-to-end turns against scripted providers and tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codeclaw_agent::test_support::*;
use codeclaw_agent::{Agent, AgentSettings, ToolCallbacks};
use codeclaw_core::event::DomainEvent;
use codeclaw_core::message::Role;
use codeclaw_core::tool::{Tool, ToolCall, ToolRegistry, ToolResult};
use codeclaw_memory::{InMemoryStore, MemoryManager, MemorySettings};
use codeclaw_telemetry::SpanKind;
use serde_json::json;

fn memory() -> Arc<MemoryManager> {
    Arc::new(MemoryManager::new(
        MemorySettings::default(),
        Arc::new(InMemoryStore::new()),
    ))
}

fn agent(provider: Arc<ScriptedProvider>, tools: Vec<Arc<dyn Tool>>) -> Agent {
    let registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    Agent::new(provider, Arc::new(registry), memory(), AgentSettings::default())
}

#[tokio::test]
async fn simple_turn() {
    let provider = Arc::new(ScriptedProvider::responses(vec![text_response("hello")]));
    let agent = agent(provider, vec![]);
    let mut events = agent.events().subscribe();

    assert_eq!(agent.chat("hi").await.unwrap(), "hello");

    let messages = agent.memory().messages().await;
    let entries: Vec<(&str, &str)> = messages
        .iter()
        .map(|m| (m.role.as_str(), m.content.as_str()))
        .collect();
    assert_eq!(entries, vec![("user", "hi"), ("assistant", "hello")]);

    assert!(agent.recorder().spans_of(SpanKind::ToolExecution).is_empty());
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(*event, DomainEvent::ToolExecuted { .. }));
    }
}

#[tokio::test]
async fn single_tool_turn() {
    let provider = Arc::new(ScriptedProvider::responses(vec![
        tool_call_response(vec![tool_call("c1", "read_file", json!({"path": "foo.txt"}))]),
        text_response("content is FOO"),
    ]));
    let reader = Arc::new(EchoTool::with_output("read_file", "FOO"));
    let agent = agent(provider.clone(), vec![reader]);

    let started = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(Mutex::new(Vec::new()));
    agent.set_tool_callbacks(ToolCallbacks {
        on_start: Some({
            let started = started.clone();
            Arc::new(move |call: &ToolCall| started.lock().unwrap().push(call.id.clone()))
        }),
        on_complete: Some({
            let completed = completed.clone();
            Arc::new(move |call: &ToolCall, _: &ToolResult| completed.lock().unwrap().push(call.id.clone()))
        }),
        on_error: None,
    });

    assert_eq!(agent.chat("read foo.txt").await.unwrap(), "content is FOO");
    assert_eq!(*started.lock().unwrap(), vec!["c1"]);
    assert_eq!(*completed.lock().unwrap(), vec!["c1"]);

    let transcript = agent.transcript().await;
    let tool_message = transcript
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_message.content, "FOO");
    assert!(transcript.tool_pairing_violation().is_none());

    let item = agent.memory().working_item("foo.txt").await.unwrap();
    assert_eq!(item.relevance, 1.0);
    assert_eq!(item.content, "FOO");
}

#[tokio::test(start_paused = true)]
async fn parallel_tools_keep_call_order() {
    let provider = Arc::new(ScriptedProvider::responses(vec![
        tool_call_response(vec![
            tool_call("c1", "wait", json!({"ms": 100, "text": "one"})),
            tool_call("c2", "wait", json!({"ms": 50, "text": "two"})),
            tool_call("c3", "wait", json!({"ms": 10, "text": "three"})),
        ]),
        text_response("all done"),
    ]));
    let agent = agent(provider, vec![Arc::new(EchoTool::new("wait"))]);

    let started = tokio::time::Instant::now();
    agent.chat("run the probes").await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed <= Duration::from_millis(150), "took {elapsed:?}");

    let transcript = agent.transcript().await;
    let results: Vec<(&str, &str)> = transcript
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.as_deref().unwrap_or_default(), m.content.as_str()))
        .collect();
    assert_eq!(results, vec![("c1", "one"), ("c2", "two"), ("c3", "three")]);
}

#[tokio::test]
async fn sensitive_tool_denied() {
    let provider = Arc::new(ScriptedProvider::responses(vec![
        tool_call_response(vec![tool_call("c1", "write_file", json!({"path": "a.txt", "text": "x"}))]),
        text_response("understood"),
    ]));
    let writer = Arc::new(EchoTool::new("write_file"));
    let agent = agent(provider.clone(), vec![writer.clone()]);

    let asked = Arc::new(AtomicUsize::new(0));
    let responder = agent.approvals().responder();
    let counter = asked.clone();
    agent.approvals().set_request_handler(move |request| {
        assert_eq!(request.tool_name, "write_file");
        counter.fetch_add(1, Ordering::SeqCst);
        let responder = responder.clone();
        tokio::spawn(async move {
            responder.respond(false);
        });
    });

    assert_eq!(agent.chat("write a.txt").await.unwrap(), "understood");
    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(writer.calls(), 0);

    let transcript = agent.transcript().await;
    let tool_message = transcript
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_message.content.contains("denied"));

    let second_request = &provider.requests()[1];
    let seen = second_request.messages.last().unwrap();
    assert_eq!(seen.role, Role::Tool);
    assert!(seen.content.contains("denied"));
}

#[tokio::test]
async fn truncation_continuation() {
    let provider = Arc::new(ScriptedProvider::responses(vec![
        truncated_response("partial…"),
        text_response("…done"),
    ]));
    let agent = agent(provider.clone(), vec![]);

    assert_eq!(agent.chat("write the essay").await.unwrap(), "partial……done");
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn cancellation_mid_stream() {
    let provider = Arc::new(ScriptedProvider::new(vec![Step::Stream {
        chunks: vec!["tok ".to_string(); 200],
        interval: Duration::from_millis(10),
    }]));
    let agent = Arc::new(agent(provider.clone(), vec![]));

    let done_calls = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(Mutex::new(String::new()));

    let stopper = {
        let agent = agent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(agent.stop_current_request());
        })
    };

    let done = done_calls.clone();
    let text = received.clone();
    let outcome = agent
        .chat_with_streaming("tell me a long story", move |content, _thinking, is_done| {
            if is_done {
                done.fetch_add(1, Ordering::SeqCst);
            } else {
                text.lock().unwrap().push_str(content);
            }
        })
        .await;
    stopper.await.unwrap();

    assert!(outcome.unwrap_err().is_cancelled());
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
    assert!(!received.lock().unwrap().is_empty());

    let messages = agent.memory().messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
    assert_eq!(agent.usage_stats().cancelled_turns, 1);

    let transcript = agent.transcript().await;
    assert!(transcript.messages.last().unwrap().is_stopped());

    // the next turn starts cleanly
    provider.push(Step::Respond(text_response("fresh start")));
    assert_eq!(agent.chat("again").await.unwrap(), "fresh start");
    assert!(!agent.is_busy());
}

#[tokio::test]
async fn rules_edit_refreshes_system_context() {
    let dir = tempfile::tempdir().unwrap();
    let rules = dir.path().join("RULES.md");
    std::fs::write(&rules, "Use tabs.").unwrap();

    let provider = Arc::new(ScriptedProvider::responses(vec![
        text_response("ok"),
        text_response("ok again"),
    ]));
    let registry = Arc::new(ToolRegistry::new());
    let agent = Agent::new(provider.clone(), registry, memory(), AgentSettings::default())
        .with_rules_file(&rules);

    agent.chat("hi").await.unwrap();
    let before = agent.context_stats().fingerprint;
    std::fs::write(&rules, "Use spaces.").unwrap();
    agent.chat("hi").await.unwrap();

    assert_ne!(before, agent.context_stats().fingerprint);
    let second = &provider.requests()[1];
    assert_eq!(second.messages[0].role, Role::System);
    assert!(second.messages[0].content.contains("Use spaces."));
}

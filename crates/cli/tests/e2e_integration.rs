//! End-to-end runs of the agent against the real file and shell tools and
//! the heartbeat, with a scripted model.

use std::sync::Arc;

use codeclaw_agent::test_support::{ScriptedProvider, text_response, tool_call, tool_call_response};
use codeclaw_agent::{Agent, AgentSettings};
use codeclaw_core::message::Role;
use codeclaw_heartbeat::{Heartbeat, HeartbeatSettings, ProjectHealth, StaticHealth, TickOutcome};
use codeclaw_memory::{InMemoryStore, MemoryManager, MemorySettings};
use codeclaw_security::{PermissionSettings, Permissions};
use serde_json::json;

fn agent_in(root: &std::path::Path, provider: Arc<ScriptedProvider>) -> Agent {
    let memory = Arc::new(MemoryManager::new(
        MemorySettings::default(),
        Arc::new(InMemoryStore::new()),
    ));
    let permissions = Permissions::new(&PermissionSettings {
        auto_approve: true,
        ..Default::default()
    })
    .unwrap();
    Agent::new(
        provider,
        Arc::new(codeclaw_tools::default_registry(root)),
        memory,
        AgentSettings::default(),
    )
    .with_permissions(permissions)
}

fn tool_messages(agent_transcript: &codeclaw_core::message::Conversation) -> Vec<String> {
    agent_transcript
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.clone())
        .collect()
}

#[tokio::test]
async fn write_then_read_through_real_tools() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::responses(vec![
        tool_call_response(vec![tool_call(
            "w1",
            "write_file",
            json!({"path": "notes/plan.md", "content": "step one"}),
        )]),
        tool_call_response(vec![tool_call("r1", "read_file", json!({"path": "notes/plan.md"}))]),
        text_response("the plan has one step"),
    ]));
    let agent = agent_in(dir.path(), provider.clone());

    let answer = agent.chat("write a plan and read it back").await.unwrap();
    assert_eq!(answer, "the plan has one step");

    let on_disk = std::fs::read_to_string(dir.path().join("notes/plan.md")).unwrap();
    assert_eq!(on_disk, "step one");

    let transcript = agent.transcript().await;
    let results = tool_messages(&transcript);
    assert_eq!(results.len(), 2);
    assert!(results[0].contains("wrote 8 bytes"));
    assert_eq!(results[1], "step one");
    assert!(transcript.tool_pairing_violation().is_none());

    let item = agent.memory().working_item("notes/plan.md").await.unwrap();
    assert_eq!(item.content, "step one");
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn paths_outside_the_project_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::responses(vec![
        tool_call_response(vec![tool_call("r1", "read_file", json!({"path": "../../etc/passwd"}))]),
        text_response("cannot read that"),
    ]));
    let agent = agent_in(dir.path(), provider);

    agent.chat("read the password file").await.unwrap();
    let results = tool_messages(&agent.transcript().await);
    assert!(results[0].starts_with("Error:"), "{}", results[0]);
    assert!(agent.memory().working_items().await.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn destructive_commands_never_reach_the_shell() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::responses(vec![
        tool_call_response(vec![tool_call("s1", "shell", json!({"command": "rm -rf /"}))]),
        text_response("refused"),
    ]));
    let agent = agent_in(dir.path(), provider.clone());

    agent.chat("clean everything").await.unwrap();

    let second = &provider.requests()[1];
    let seen = second.messages.last().unwrap();
    assert_eq!(seen.role, Role::Tool);
    assert!(seen.content.contains("blocked by policy"));
    assert_eq!(agent.audit().count(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn approved_shell_command_runs_in_the_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "").unwrap();
    let provider = Arc::new(ScriptedProvider::responses(vec![
        tool_call_response(vec![tool_call("s1", "shell", json!({"command": "ls"}))]),
        text_response("listed"),
    ]));
    let agent = agent_in(dir.path(), provider);

    agent.chat("list files").await.unwrap();
    let results = tool_messages(&agent.transcript().await);
    assert!(results[0].contains("marker.txt"));
    assert_eq!(agent.usage_stats().tool_calls, 1);
}

#[tokio::test]
async fn heartbeat_turn_lands_in_the_agent_transcript() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("TASKS.md"), "- [ ] write the changelog\n").unwrap();
    let provider = Arc::new(ScriptedProvider::responses(vec![text_response("changelog drafted")]));
    let agent = Arc::new(agent_in(dir.path(), provider));

    let settings = HeartbeatSettings {
        reflection_every: 0,
        task_file: dir.path().join("TASKS.md"),
        knowledge_file: dir.path().join(".codeclaw/BRAIN.md"),
        roadmap_file: dir.path().join(".codeclaw/ROADMAP.md"),
        ..HeartbeatSettings::default()
    };
    let heartbeat = Heartbeat::new(
        settings,
        agent.clone(),
        Arc::new(StaticHealth(ProjectHealth::default())),
    );

    let outcome = heartbeat.tick().await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Woke {
            reply: "changelog drafted".into()
        }
    );

    let transcript = agent.transcript().await;
    let user = transcript
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .unwrap();
    assert!(user.content.contains("write the changelog"));
}

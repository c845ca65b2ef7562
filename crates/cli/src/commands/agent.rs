//! `codeclaw agent`: interactive or single-message chat.

use std::io::Write;
use std::sync::Arc;

use codeclaw_agent::{Agent, ToolCallbacks};
use codeclaw_config::AppConfig;
use codeclaw_core::tool::{ToolCall, ToolResult};
use codeclaw_security::ApprovalResponder;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::runtime;

pub async fn run(message: Option<String>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if runtime::needs_api_key(&config) {
        eprintln!();
        eprintln!("  ERROR: No API key configured for '{}'!", config.default_provider);
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CODECLAW_API_KEY, OPENROUTER_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let agent = runtime::build_agent(&config).await?;
    install_observers(&agent, verbose);
    let heartbeat = runtime::spawn_heartbeat(&config, &agent);
    let mut lines = stdin_lines();

    if let Some(msg) = message {
        drive_turn(&agent, &msg, &mut lines).await;
    } else {
        println!();
        println!("  CodeClaw · interactive mode");
        println!();
        println!("  Provider:  {}", config.default_provider);
        println!("  Model:     {}", agent.settings().model);
        println!("  Project:   {}", config.project_root().display());
        println!("  Tools:     {}", agent.registry().names().join(", "));
        if heartbeat.is_some() {
            println!("  Heartbeat: every {}s", config.heartbeat.interval_secs);
        }
        println!();
        println!("  Ctrl+C stops a running answer. Type 'exit' or press Ctrl+C at the prompt to quit.");
        println!();

        let responder = agent.approvals().responder();
        loop {
            prompt();
            let line = tokio::select! {
                line = lines.recv() => line,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };
            // A heartbeat turn may be asking while the prompt is idle.
            if answer_pending_approval(&responder, &line) {
                continue;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }
            drive_turn(&agent, line, &mut lines).await;
        }
        println!();
    }

    agent.shutdown().await;
    if let Some(handle) = heartbeat {
        let _ = handle.await;
    }
    Ok(())
}

/// Run one turn while stdin answers approval prompts and Ctrl+C stops the turn.
async fn drive_turn(agent: &Arc<Agent>, text: &str, lines: &mut mpsc::Receiver<String>) {
    let responder = agent.approvals().responder();
    let turn = agent.chat(text);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            Some(line) = lines.recv() => {
                if !answer_pending_approval(&responder, &line) {
                    eprintln!("  (busy: press Ctrl+C to stop the current answer)");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if agent.stop_current_request() {
                    eprintln!("\n  [stopping]");
                }
            }
        }
    };

    match outcome {
        Ok(_) => println!("\n"),
        Err(e) if e.is_cancelled() => eprintln!("\n  [stopped]\n"),
        Err(e) => eprintln!("\n  [Error] {e}\n"),
    }
}

/// Route a stdin line to a waiting approval request. Returns `false` when
/// nothing is waiting and the line is ordinary input.
fn answer_pending_approval(responder: &ApprovalResponder, line: &str) -> bool {
    if !responder.is_waiting() {
        return false;
    }
    let approved = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
    responder.respond(approved);
    true
}

fn install_observers(agent: &Agent, verbose: bool) {
    agent.set_stream_callback(move |content, thinking, done| {
        let mut out = std::io::stdout().lock();
        if verbose && !thinking.is_empty() {
            eprint!("{thinking}");
        }
        if !content.is_empty() {
            let _ = write!(out, "{content}");
        }
        if done || !content.is_empty() {
            let _ = out.flush();
        }
    });

    agent.set_status_callback(|status| debug!(status, "Agent status"));

    agent.set_tool_callbacks(ToolCallbacks {
        on_start: Some(Arc::new(|call: &ToolCall| {
            eprintln!("\n  ⚙ {}", call.name);
        })),
        on_complete: Some(Arc::new(|call: &ToolCall, _: &ToolResult| {
            debug!(tool = %call.name, "Tool finished");
        })),
        on_error: Some(Arc::new(|call: &ToolCall, error: &str| {
            eprintln!("  ✗ {}: {error}", call.name);
        })),
    });

    agent.approvals().set_request_handler(|request| {
        eprintln!();
        eprintln!("  Approval needed: {} ({})", request.tool_name, request.call_id);
        eprintln!("    {}", request.preview);
        eprint!("  Allow? [y/N] ");
        let _ = std::io::stderr().flush();
    });
}

/// Stdin as a stream of lines, read on one task so turns and approvals can share it.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

fn prompt() {
    print!("  You > ");
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeclaw_security::{ApprovalBridge, ApprovalDecision, ApprovalRequest};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn pending(bridge: &Arc<ApprovalBridge>) -> tokio::task::JoinHandle<ApprovalDecision> {
        bridge.set_request_handler(|_| {});
        let asking = bridge.clone();
        let handle = tokio::spawn(async move {
            asking
                .request(
                    ApprovalRequest::new("shell", "c1", "{\"command\":\"ls\"}"),
                    Duration::from_secs(5),
                    &CancellationToken::new(),
                )
                .await
        });
        while !bridge.responder().is_waiting() {
            tokio::task::yield_now().await;
        }
        handle
    }

    #[test]
    fn idle_lines_are_ordinary_input() {
        let bridge = ApprovalBridge::new();
        assert!(!answer_pending_approval(&bridge.responder(), "y"));
    }

    #[tokio::test]
    async fn yes_answers_a_waiting_request() {
        let bridge = Arc::new(ApprovalBridge::new());
        let handle = pending(&bridge).await;

        assert!(answer_pending_approval(&bridge.responder(), " Yes "));
        assert_eq!(handle.await.unwrap(), ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn anything_else_denies_a_waiting_request() {
        let bridge = Arc::new(ApprovalBridge::new());
        let handle = pending(&bridge).await;

        assert!(answer_pending_approval(&bridge.responder(), "explain main.rs"));
        assert_eq!(handle.await.unwrap(), ApprovalDecision::Denied);
    }
}

//! CLI handlers that follow live runs: watch and skills.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::ClawPilotConfig;
use crate::dashboard::{Dashboard, DashboardSnapshot};
use crate::gateway::{AgentTransport, HttpAgent, HttpDecisionSink, PollingAgent, RunAgentInput};
use crate::run::{Run, RunCreationPolicy};

use super::WatchArgs;

/// A line typed by the operator while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Approve { tool_call_id: String },
    Reject { tool_call_id: String, reason: String },
    Quit,
}

/// Parse `approve <id>`, `reject <id> [reason...]` or `quit`.
pub fn parse_operator_command(line: &str) -> Option<OperatorCommand> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;
    match verb {
        "approve" | "a" => Some(OperatorCommand::Approve {
            tool_call_id: parts.next()?.to_string(),
        }),
        "reject" | "r" => {
            let tool_call_id = parts.next()?.to_string();
            let reason = parts.collect::<Vec<_>>().join(" ");
            Some(OperatorCommand::Reject {
                tool_call_id,
                reason: if reason.is_empty() {
                    "rejected by operator".to_string()
                } else {
                    reason
                },
            })
        }
        "quit" | "q" => Some(OperatorCommand::Quit),
        _ => None,
    }
}

/// Handle `clawpilot watch`.
pub async fn handle_watch(
    mut config: ClawPilotConfig,
    args: WatchArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.strict {
        config.run_creation = RunCreationPolicy::Strict;
    }
    if let Some(reconnects) = args.reconnects {
        config.stream_max_reconnects = reconnects;
    }
    let thread_id = args.thread.unwrap_or_else(|| config.thread_id.clone());
    let input = match args.prompt {
        Some(prompt) => RunAgentInput::prompt(thread_id, prompt),
        // The polling agent sends its default prompt for an empty input.
        None if args.poll => RunAgentInput::new(thread_id, Vec::new()),
        None => RunAgentInput::heartbeat(thread_id),
    };

    let (agent, url): (Box<dyn AgentTransport>, String) = if args.poll {
        let agent = PollingAgent::new(&config)?;
        let url = agent.base_url().to_string();
        (Box::new(agent), url)
    } else {
        let agent = HttpAgent::new(&config)?;
        let url = agent.url().to_string();
        (Box::new(agent), url)
    };
    let dashboard = Arc::new(
        Dashboard::from_config(&config)
            .with_decision_sink(Arc::new(HttpDecisionSink::new(&config)?)),
    );
    let cancel = CancellationToken::new();

    println!("👀 Watching {url} (approve <id> | reject <id> [reason] | quit)");

    let render = {
        let mut snapshots = dashboard.snapshot_stream();
        tokio::spawn(async move {
            let mut last = DashboardSnapshot::default();
            while let Some(snapshot) = snapshots.next().await {
                render_changes(&last, &snapshot);
                last = snapshot;
            }
        })
    };

    let operator = {
        let dashboard = dashboard.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                let Ok(Some(line)) = line else { break };
                let result = match parse_operator_command(&line) {
                    Some(OperatorCommand::Approve { tool_call_id }) => {
                        dashboard.approve(&tool_call_id, "approved by operator").await
                    }
                    Some(OperatorCommand::Reject {
                        tool_call_id,
                        reason,
                    }) => dashboard.reject(&tool_call_id, reason).await,
                    Some(OperatorCommand::Quit) => {
                        cancel.cancel();
                        break;
                    }
                    None => {
                        eprintln!("unrecognised command: {line}");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    eprintln!("⚠️  Decision not delivered: {e}");
                }
            }
        })
    };

    let end = dashboard.run(agent.as_ref(), input, cancel.clone()).await;
    cancel.cancel();
    render.abort();
    operator.abort();

    let end = end?;
    println!("⏹  Stopped ({end:?})");
    Ok(())
}

fn render_changes(previous: &DashboardSnapshot, current: &DashboardSnapshot) {
    for run in &current.runs {
        let before = previous.runs.iter().find(|r| r.run_id == run.run_id);
        if before.map(|r| r.as_ref()) != Some(run.as_ref()) {
            println!("{}", describe_run(run));
        }
    }
    for call in &current.pending {
        if !previous
            .pending
            .iter()
            .any(|p| p.tool_call_id == call.tool_call_id)
        {
            println!(
                "⚠️  {} wants to run `{}` (run {}): approve {} | reject {}",
                call.tool_call_id, call.tool_call_name, call.run_id, call.tool_call_id, call.tool_call_id
            );
        }
    }
}

fn describe_run(run: &Run) -> String {
    let step = run
        .current_step()
        .map(|step| format!(" [{}]", step.name))
        .unwrap_or_default();
    let error = run
        .error
        .as_deref()
        .map(|e| format!(" error: {e}"))
        .unwrap_or_default();
    format!("{} {}{step}{error}", run.run_id, run.status)
}

/// Handle `clawpilot skills`.
#[cfg(feature = "skills")]
pub async fn handle_skills(config: ClawPilotConfig) -> Result<(), Box<dyn std::error::Error>> {
    use std::time::Duration;

    use crate::gateway::GatewaySocket;

    let socket = GatewaySocket::connect(&config).await?;
    let listed = match socket.next_skills(Duration::from_secs(10)).await {
        Ok(listed) => listed,
        Err(err) => {
            socket.close().await?;
            return Err(format!("gateway did not send a skills list: {err}").into());
        }
    };

    println!("🧩 Skills\n");
    for skill in listed {
        match skill.description.as_deref() {
            Some(description) => println!("  {}: {description}", skill.name),
            None => println!("  {}", skill.name),
        }
    }
    socket.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn operator_commands_parse() {
        assert_eq!(
            parse_operator_command("approve call-1"),
            Some(OperatorCommand::Approve {
                tool_call_id: "call-1".into()
            })
        );
        assert_eq!(
            parse_operator_command("reject call-2 too risky here"),
            Some(OperatorCommand::Reject {
                tool_call_id: "call-2".into(),
                reason: "too risky here".into()
            })
        );
        assert_eq!(
            parse_operator_command("r call-3"),
            Some(OperatorCommand::Reject {
                tool_call_id: "call-3".into(),
                reason: "rejected by operator".into()
            })
        );
        assert_eq!(parse_operator_command("q"), Some(OperatorCommand::Quit));
        assert_eq!(parse_operator_command("approve"), None);
        assert_eq!(parse_operator_command("   "), None);
        assert_eq!(parse_operator_command("dance"), None);
    }

    #[test]
    fn run_line_shows_status_and_error() {
        let mut run = Run::new("r1", None, Utc::now());
        assert_eq!(describe_run(&run), "r1 running");
        run.status = crate::run::RunStatus::Error;
        run.error = Some("boom".into());
        assert_eq!(describe_run(&run), "r1 error error: boom");
    }
}

//! REST run transport: start a run, then poll its status until it ends.
//!
//! The gateway returns run snapshots (`{id, status, tools}`) instead of an
//! event stream. [`RunSnapshotTracker`] diffs consecutive snapshots into the
//! same [`RunEvent`]s the SSE transport produces, so the dashboard consumes
//! both transports the same way.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::config::ClawPilotConfig;
use crate::error::{ClawPilotError, Result};
use crate::events::RunEvent;

use super::agent::{AgentTransport, EventStream, RunAgentInput};
use super::http::{build_client, endpoint_url, gateway_headers, status_to_error};

/// Statuses after which a run is never polled again.
pub const TERMINAL_STATUSES: [&str; 6] = [
    "succeeded",
    "failed",
    "cancelled",
    "completed",
    "error",
    "rejected",
];

/// Prompt sent when the run input carries no messages.
pub const DEFAULT_RUN_PROMPT: &str = "triage inbox";

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

fn is_success_status(status: &str) -> bool {
    matches!(status, "succeeded" | "completed")
}

/// A tool call as reported in a run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTool {
    pub id: String,
    #[serde(default, alias = "tool")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, alias = "arguments")]
    pub args: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteTool {
    /// `status`, falling back to `state`.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref().or(self.state.as_deref())
    }

    pub fn needs_approval(&self) -> bool {
        self.requires_approval || self.status() == Some("pending")
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Arguments as the text a `TOOL_CALL_ARGS` delta carries.
    fn args_text(&self) -> Option<String> {
        match &self.args {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// One snapshot of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRun {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_tools")]
    pub tools: Vec<RemoteTool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteRun {
    pub fn is_terminal(&self) -> bool {
        is_terminal_status(&self.status)
    }

    /// Tools still waiting on the operator.
    pub fn pending_tools(&self) -> impl Iterator<Item = &RemoteTool> {
        self.tools.iter().filter(|tool| tool.needs_approval())
    }
}

/// A missing or non-array `tools` is empty; malformed entries are skipped.
fn lenient_tools<'de, D>(deserializer: D) -> std::result::Result<Vec<RemoteTool>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(tool) => Some(tool),
            Err(err) => {
                tracing::debug!(error = %err, "skipping malformed tool entry");
                None
            }
        })
        .collect())
}

/// Turns successive snapshots of one run into run events.
#[derive(Debug)]
pub struct RunSnapshotTracker {
    thread_id: String,
    started: bool,
    finished: bool,
    step: Option<String>,
    announced: HashSet<String>,
    awaiting: HashSet<String>,
}

impl RunSnapshotTracker {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            started: false,
            finished: false,
            step: None,
            announced: HashSet::new(),
            awaiting: HashSet::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Events describing what changed since the previous snapshot.
    ///
    /// Non-terminal statuses become steps. Tools that need approval are
    /// announced once as a flagged `TOOL_CALL_START`/`ARGS`/`END` sequence.
    /// A tool that stops needing approval before the operator decides gets a
    /// `TOOL_CALL_RESULT`.
    pub fn observe(&mut self, run: &RemoteRun) -> Vec<RunEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let run_id = run.id.as_str();
        if !self.started {
            self.started = true;
            events.push(RunEvent::run_started(run_id, self.thread_id.as_str()));
        }

        let status = run.status.as_str();
        if !run.is_terminal() && !status.is_empty() && self.step.as_deref() != Some(status) {
            if let Some(previous) = self.step.take() {
                events.push(RunEvent::step_finished(run_id, previous));
            }
            self.step = Some(run.status.clone());
            events.push(RunEvent::step_started(run_id, run.status.as_str()));
        }

        let mut still_awaiting = HashSet::new();
        for tool in run.pending_tools() {
            still_awaiting.insert(tool.id.clone());
            if !self.announced.insert(tool.id.clone()) {
                continue;
            }
            events.push(
                RunEvent::tool_call_start(run_id, tool.id.as_str(), tool.display_name())
                    .with_requires_approval(),
            );
            if let Some(args) = tool.args_text() {
                events.push(RunEvent::tool_call_args(run_id, tool.id.as_str(), args));
            }
            events.push(RunEvent::tool_call_end(run_id, tool.id.as_str()));
        }
        let mut settled: Vec<&String> = self.awaiting.difference(&still_awaiting).collect();
        settled.sort();
        for id in settled {
            let status = run
                .tools
                .iter()
                .find(|tool| &tool.id == id)
                .and_then(RemoteTool::status)
                .unwrap_or("resolved");
            events.push(RunEvent::tool_call_result(run_id, id.as_str(), status));
        }
        self.awaiting = still_awaiting;

        if run.is_terminal() {
            self.finished = true;
            if let Some(step) = self.step.take() {
                events.push(RunEvent::step_finished(run_id, step));
            }
            events.push(if is_success_status(&run.status) {
                RunEvent::run_finished(run_id)
            } else {
                RunEvent::run_error(run_id, format!("run {}", run.status))
            });
        }
        events
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct StartRunRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
}

impl<'a> From<&'a RunAgentInput> for StartRunRequest<'a> {
    fn from(input: &'a RunAgentInput) -> Self {
        let messages = if input.messages.is_empty() {
            vec![ChatMessage {
                role: "user",
                content: DEFAULT_RUN_PROMPT,
            }]
        } else {
            input
                .messages
                .iter()
                .map(|message| ChatMessage {
                    role: &message.role,
                    content: &message.content,
                })
                .collect()
        };
        Self { messages }
    }
}

/// Starts runs with `POST {gateway}/v1/chat/completions` and follows them
/// with `GET {gateway}/runs/{id}`.
#[derive(Debug, Clone)]
pub struct PollingAgent {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl PollingAgent {
    pub fn new(config: &ClawPilotConfig) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: config.gateway_url.clone(),
            token: config.resolve_device_token(),
            poll_interval: config.run_poll_interval,
            timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn start_run(&self, input: &RunAgentInput) -> Result<RemoteRun> {
        let url = endpoint_url(&self.base_url, &["v1", "chat", "completions"])?;
        tracing::debug!(%url, thread_id = %input.thread_id, "starting polled run");
        let response = self
            .client
            .post(url)
            .headers(gateway_headers(self.token.as_deref()))
            .timeout(self.timeout)
            .json(&StartRunRequest::from(input))
            .send()
            .await?;
        read_run(response).await
    }

    pub async fn fetch_run(&self, run_id: &str) -> Result<RemoteRun> {
        let url = endpoint_url(&self.base_url, &["runs", run_id])?;
        let response = self
            .client
            .get(url)
            .headers(gateway_headers(self.token.as_deref()))
            .timeout(self.timeout)
            .send()
            .await?;
        read_run(response).await
    }
}

async fn read_run(response: reqwest::Response) -> Result<RemoteRun> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_to_error(status.as_u16(), &body));
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl AgentTransport for PollingAgent {
    async fn run(&self, input: RunAgentInput) -> Result<EventStream> {
        let first = self.start_run(&input).await?;
        if first.id.is_empty() {
            return Err(ClawPilotError::InvalidState(
                "gateway started a run without an id".into(),
            ));
        }
        tracing::info!(run_id = %first.id, status = %first.status, "run started");

        let agent = self.clone();
        let mut tracker = RunSnapshotTracker::new(input.thread_id);
        let stream = async_stream::stream! {
            for event in tracker.observe(&first) {
                yield Ok(event);
            }
            // First poll follows the start immediately.
            let mut delay = Duration::ZERO;
            while !tracker.is_finished() {
                tokio::time::sleep(delay).await;
                delay = agent.poll_interval;
                match agent.fetch_run(&first.id).await {
                    Ok(run) => {
                        for event in tracker.observe(&run) {
                            yield Ok(event);
                        }
                    }
                    Err(err) if err.is_retryable() => {
                        tracing::warn!(run_id = %first.id, error = %err, "run poll failed, retrying");
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

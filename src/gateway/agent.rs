//! AG-UI transport: opens a run on the gateway and streams its events.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest_eventsource::retry::{ExponentialBackoff, Never, RetryPolicy};
use reqwest_eventsource::{Error as SseError, Event, EventSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ClawPilotConfig;
use crate::error::{ClawPilotError, Result};
use crate::events::RunEvent;

use super::http::{build_client, gateway_headers, status_to_error};

/// Ordered events of one agent run.
pub type EventStream = BoxStream<'static, Result<RunEvent>>;

/// A chat message sent along with a run request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub id: String,
    pub role: String,
    pub content: String,
}

impl InputMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Body of an AG-UI run request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
    pub thread_id: String,
    pub run_id: String,
    pub messages: Vec<InputMessage>,
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    #[serde(default)]
    pub context: Vec<serde_json::Value>,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub forwarded_props: serde_json::Value,
}

impl RunAgentInput {
    pub fn new(thread_id: impl Into<String>, messages: Vec<InputMessage>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: Uuid::new_v4().to_string(),
            messages,
            tools: Vec::new(),
            context: Vec::new(),
            state: serde_json::Value::Object(Default::default()),
            forwarded_props: serde_json::Value::Object(Default::default()),
        }
    }

    /// The keep-alive run the dashboard opens to start receiving events.
    pub fn heartbeat(thread_id: impl Into<String>) -> Self {
        Self::new(thread_id, vec![InputMessage::user("heartbeat")])
    }

    pub fn prompt(thread_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(thread_id, vec![InputMessage::user(prompt)])
    }
}

/// Anything that can open an agent run and stream its events.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn run(&self, input: RunAgentInput) -> Result<EventStream>;
}

/// Parse one SSE `data:` payload. Blank payloads yield `None`.
pub fn parse_event_data(data: &str) -> Option<std::result::Result<RunEvent, serde_json::Error>> {
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}

/// AG-UI over HTTP + server-sent events.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    max_reconnects: usize,
}

impl HttpAgent {
    pub fn new(config: &ClawPilotConfig) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            url: config.gateway_url.clone(),
            token: config.resolve_device_token(),
            max_reconnects: config.stream_max_reconnects,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn retry_policy(&self) -> Box<dyn RetryPolicy + Send + Unpin + 'static> {
        if self.max_reconnects == 0 {
            Box::new(Never)
        } else {
            Box::new(ExponentialBackoff::new(
                Duration::from_millis(500),
                2.0,
                Some(Duration::from_secs(30)),
                Some(self.max_reconnects),
            ))
        }
    }
}

#[async_trait]
impl AgentTransport for HttpAgent {
    async fn run(&self, input: RunAgentInput) -> Result<EventStream> {
        tracing::debug!(
            url = %self.url,
            thread_id = %input.thread_id,
            run_id = %input.run_id,
            "opening agent run"
        );

        let request = self
            .client
            .post(&self.url)
            .headers(gateway_headers(self.token.as_deref()))
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&input);
        let mut source = EventSource::new(request)
            .map_err(|err| ClawPilotError::Stream(format!("cannot open event stream: {err}")))?;
        source.set_retry_policy(self.retry_policy());
        let reconnecting = self.max_reconnects > 0;

        let stream = async_stream::stream! {
            while let Some(item) = source.next().await {
                match item {
                    Ok(Event::Open) => tracing::debug!("event stream open"),
                    Ok(Event::Message(message)) => match parse_event_data(&message.data) {
                        Some(Ok(event)) => yield Ok(event),
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, data = %message.data, "skipping malformed event");
                        }
                        None => {}
                    },
                    Err(SseError::StreamEnded) => break,
                    Err(SseError::InvalidStatusCode(status, response)) => {
                        let body = response.text().await.unwrap_or_default();
                        yield Err(status_to_error(status.as_u16(), &body));
                        break;
                    }
                    Err(SseError::Transport(err)) if reconnecting => {
                        tracing::warn!(error = %err, "event stream interrupted, reconnecting");
                    }
                    Err(err) => {
                        yield Err(ClawPilotError::Stream(err.to_string()));
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    #[test]
    fn heartbeat_input_matches_dashboard_request() {
        let input = RunAgentInput::heartbeat("main");
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["threadId"], "main");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "heartbeat");
        assert!(value["forwardedProps"].is_object());
        assert!(Uuid::parse_str(&input.run_id).is_ok());
    }

    #[test]
    fn parse_event_data_handles_blank_and_junk() {
        assert!(parse_event_data("   ").is_none());
        assert!(parse_event_data("[DONE]").is_none());
        assert!(parse_event_data("{not json").unwrap().is_err());

        let event = parse_event_data(r#"{"type":"RUN_FINISHED","runId":"r1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::RunFinished);
    }
}

//! AG-UI run events as they arrive from the gateway.
//!
//! Only `type` is required. Fields the reducer understands are typed; the
//! rest is kept in [`RunEvent::extra`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::EnumString;

/// Extra field marking a `TOOL_CALL_START` the gateway wants approved.
pub const REQUIRES_APPROVAL: &str = "requiresApproval";

/// Wire `type` of an AG-UI event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RunStarted,
    RunFinished,
    RunError,
    StepStarted,
    StepFinished,
    TextMessageStart,
    TextMessageContent,
    TextMessageEnd,
    ToolCallStart,
    ToolCallArgs,
    ToolCallEnd,
    ToolCallResult,
    StateSnapshot,
    StateDelta,
    MessagesSnapshot,
    Raw,
    Custom,
    /// Any type this crate does not know about.
    #[strum(default)]
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RunStarted => "RUN_STARTED",
            Self::RunFinished => "RUN_FINISHED",
            Self::RunError => "RUN_ERROR",
            Self::StepStarted => "STEP_STARTED",
            Self::StepFinished => "STEP_FINISHED",
            Self::TextMessageStart => "TEXT_MESSAGE_START",
            Self::TextMessageContent => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd => "TEXT_MESSAGE_END",
            Self::ToolCallStart => "TOOL_CALL_START",
            Self::ToolCallArgs => "TOOL_CALL_ARGS",
            Self::ToolCallEnd => "TOOL_CALL_END",
            Self::ToolCallResult => "TOOL_CALL_RESULT",
            Self::StateSnapshot => "STATE_SNAPSHOT",
            Self::StateDelta => "STATE_DELTA",
            Self::MessagesSnapshot => "MESSAGES_SNAPSHOT",
            Self::Raw => "RAW",
            Self::Custom => "CUSTOM",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        raw.parse().unwrap_or(Self::Other(raw))
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event of a run's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_name: Option<String>,
    /// Milliseconds since the epoch, when the gateway stamps events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            run_id: None,
            thread_id: None,
            delta: None,
            step_name: None,
            message: None,
            tool_call_id: None,
            tool_call_name: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    pub fn for_run(event_type: EventType, run_id: impl Into<String>) -> Self {
        let mut event = Self::new(event_type);
        event.run_id = Some(run_id.into());
        event
    }

    pub fn run_started(run_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        let mut event = Self::for_run(EventType::RunStarted, run_id);
        event.thread_id = Some(thread_id.into());
        event
    }

    pub fn text_delta(run_id: impl Into<String>, delta: impl Into<String>) -> Self {
        let mut event = Self::for_run(EventType::TextMessageContent, run_id);
        event.delta = Some(delta.into());
        event
    }

    pub fn step_started(run_id: impl Into<String>, step_name: impl Into<String>) -> Self {
        let mut event = Self::for_run(EventType::StepStarted, run_id);
        event.step_name = Some(step_name.into());
        event
    }

    pub fn step_finished(run_id: impl Into<String>, step_name: impl Into<String>) -> Self {
        let mut event = Self::for_run(EventType::StepFinished, run_id);
        event.step_name = Some(step_name.into());
        event
    }

    pub fn run_finished(run_id: impl Into<String>) -> Self {
        Self::for_run(EventType::RunFinished, run_id)
    }

    pub fn run_error(run_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut event = Self::for_run(EventType::RunError, run_id);
        event.message = Some(message.into());
        event
    }

    pub fn tool_call_start(
        run_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_call_name: impl Into<String>,
    ) -> Self {
        let mut event = Self::for_run(EventType::ToolCallStart, run_id);
        event.tool_call_id = Some(tool_call_id.into());
        event.tool_call_name = Some(tool_call_name.into());
        event
    }

    pub fn tool_call_args(
        run_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        delta: impl Into<String>,
    ) -> Self {
        let mut event = Self::for_run(EventType::ToolCallArgs, run_id);
        event.tool_call_id = Some(tool_call_id.into());
        event.delta = Some(delta.into());
        event
    }

    pub fn tool_call_end(run_id: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut event = Self::for_run(EventType::ToolCallEnd, run_id);
        event.tool_call_id = Some(tool_call_id.into());
        event
    }

    pub fn tool_call_result(
        run_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut event = Self::for_run(EventType::ToolCallResult, run_id);
        event.tool_call_id = Some(tool_call_id.into());
        event
            .extra
            .insert("content".to_string(), Value::String(content.into()));
        event
    }

    /// Mark this event as needing operator approval.
    pub fn with_requires_approval(mut self) -> Self {
        self.extra
            .insert(REQUIRES_APPROVAL.to_string(), Value::Bool(true));
        self
    }

    /// The gateway asked for approval regardless of the tool's name.
    pub fn requires_approval(&self) -> bool {
        self.extra
            .get(REQUIRES_APPROVAL)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Terminal events end the run they refer to.
    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type, EventType::RunFinished | EventType::RunError)
    }
}

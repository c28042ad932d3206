//! Approval types for risky tool calls.

use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::{Display, EnumString};

/// Run id used until a pending call is correlated with its run.
pub const UNKNOWN_RUN_ID: &str = "unknown";

/// Tool names that always need operator sign-off.
pub const RISKY_TOOL_NAMES: [&str; 6] = ["shell", "exec", "email", "send", "delete", "write"];

/// Whether a tool call with this name must wait for approval.
pub fn is_risky(tool_name: &str) -> bool {
    RISKY_TOOL_NAMES.contains(&tool_name)
}

/// A risky tool call waiting for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingToolCall {
    pub tool_call_id: String,
    pub tool_call_name: String,
    /// Serialized arguments, shown verbatim.
    pub args: String,
    pub run_id: String,
}

impl PendingToolCall {
    pub fn is_correlated(&self) -> bool {
        self.run_id != UNKNOWN_RUN_ID
    }
}

/// The operator's answer to a pending call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolDecision {
    Approved { result: String },
    Rejected { reason: String },
}

impl ToolDecision {
    pub fn approved(result: impl Into<String>) -> Self {
        Self::Approved {
            result: result.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn action(&self) -> DecisionAction {
        match self {
            Self::Approved { .. } => DecisionAction::Approve,
            Self::Rejected { .. } => DecisionAction::Reject,
        }
    }

    /// Outbound message telling the agent runtime about this decision.
    pub fn to_message(&self, tool_call_id: impl Into<String>) -> ToolDecisionMessage {
        let payload = match self {
            Self::Approved { result } => json!({ "result": result }),
            Self::Rejected { reason } => json!({ "reason": reason }),
        };
        ToolDecisionMessage {
            tool_call_id: tool_call_id.into(),
            action: self.action(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DecisionAction {
    Approve,
    Reject,
}

/// A decision addressed to one tool call. The HTTP sink puts the id in the
/// URL and sends only `{action, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDecisionMessage {
    pub tool_call_id: String,
    pub action: DecisionAction,
    #[serde(default)]
    pub payload: serde_json::Value,
}

//! Operator approval of risky tool calls.

pub mod queue;
pub mod types;

pub use queue::{ApprovalQueue, DecisionError, DecisionHandle, PendingApproval};
pub use types::{
    is_risky, DecisionAction, PendingToolCall, ToolDecision, ToolDecisionMessage,
    RISKY_TOOL_NAMES, UNKNOWN_RUN_ID,
};

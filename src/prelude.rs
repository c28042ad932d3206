//! Convenience re-exports for common use.

pub use crate::approvals::{ApprovalQueue, PendingToolCall, ToolDecision, ToolDecisionMessage};
pub use crate::auth::{DeviceToken, DeviceTokenStore, PairingClient, PairingOutcome};
pub use crate::config::ClawPilotConfig;
pub use crate::dashboard::{Dashboard, DashboardSnapshot};
pub use crate::error::{ClawPilotError, Result};
pub use crate::events::{EventType, RunEvent};
pub use crate::gateway::{
    AgentTransport, DecisionSink, HttpAgent, HttpDecisionSink, PollingAgent, RunAgentInput,
};
pub use crate::run::{reduce, Run, RunCollection, RunCreationPolicy, RunStatus};

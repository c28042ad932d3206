//! Adapters that talk to the agent gateway.

pub mod agent;
pub mod decisions;
pub mod http;
pub mod polling;
#[cfg(feature = "skills")]
pub mod socket;

pub use agent::{AgentTransport, EventStream, HttpAgent, InputMessage, RunAgentInput};
pub use decisions::{DecisionSink, HttpDecisionSink};
pub use polling::{PollingAgent, RemoteRun, RemoteTool, RunSnapshotTracker};
#[cfg(feature = "skills")]
pub use socket::{GatewaySocket, Skill};

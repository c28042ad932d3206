//! ClawPilot: operator dashboard core for an AG-UI agent gateway.
//!
//! Folds the gateway's run event stream into a list of runs, holds risky
//! tool calls until an operator approves or rejects them, and pairs this
//! device with the gateway.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use clawpilot::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> clawpilot::error::Result<()> {
//! let config = ClawPilotConfig::from_env();
//! let agent = HttpAgent::new(&config)?;
//! let dashboard = Dashboard::from_config(&config)
//!     .with_decision_sink(Arc::new(HttpDecisionSink::new(&config)?));
//!
//! let input = RunAgentInput::heartbeat(config.thread_id.clone());
//! dashboard.run(&agent, input, CancellationToken::new()).await?;
//! for run in dashboard.snapshot().runs {
//!     println!("{} {}", run.run_id, run.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod approvals;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod gateway;
pub mod prelude;
pub mod run;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

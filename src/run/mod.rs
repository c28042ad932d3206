//! Run state and the event reducer that maintains it.

pub mod reducer;
pub mod types;

pub use reducer::{reduce, IgnoreReason, ReduceOutcome, RunCollection};
pub use types::{Run, RunCreationPolicy, RunStatus, Step, StepDuration};

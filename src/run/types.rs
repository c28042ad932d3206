//! Run state as shown to the operator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Run lifecycle status. `Finished` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

/// Whether events other than `RUN_STARTED` may create a run.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RunCreationPolicy {
    /// Any handled event carrying an unseen run id creates the run.
    #[default]
    Lenient,
    /// Only `RUN_STARTED` creates runs; stray events are logged and dropped.
    Strict,
}

/// Completion marker of a step. Exact timing is not tracked.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepDuration {
    #[default]
    #[serde(rename = "")]
    Pending,
    #[serde(rename = "completed")]
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub duration: StepDuration,
}

impl Step {
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: StepDuration::Pending,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.duration == StepDuration::Completed
    }
}

/// One execution of an agent task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub status: RunStatus,
    pub steps: Vec<Step>,
    /// Text fragments in arrival order.
    pub messages: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, thread_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id,
            status: RunStatus::Running,
            steps: Vec::new(),
            messages: Vec::new(),
            started_at: now,
            finished_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Concatenated message fragments.
    pub fn transcript(&self) -> String {
        self.messages.concat()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.last()
    }
}

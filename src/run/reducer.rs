//! Folds AG-UI events into the run collection.
//!
//! Runs are stored as `Arc<Run>` and every change swaps in a fresh `Arc`, so a
//! snapshot taken before an event never observes it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::events::{EventType, RunEvent};

use super::types::{Run, RunCreationPolicy, RunStatus, Step, StepDuration};

/// Why an event left the collection untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event carries no run id.
    NoRunId,
    /// Strict policy and no such run.
    UnknownRun,
    /// The run already finished or failed.
    Terminal,
    /// Not a run-lifecycle event.
    UnhandledType,
    /// `STEP_FINISHED` without a matching open step.
    StepMismatch,
    MissingField(&'static str),
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOutcome {
    Created,
    Updated,
    Ignored(IgnoreReason),
}

impl ReduceOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored(_))
    }
}

/// Runs ordered most-recent-first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunCollection {
    runs: Vec<Arc<Run>>,
}

impl RunCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a sequence of events, stamping every state change with `now`.
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a RunEvent>,
        now: DateTime<Utc>,
        policy: RunCreationPolicy,
    ) -> Self {
        let mut runs = Self::new();
        for event in events {
            runs.apply(event, now, policy);
        }
        runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, run_id: &str) -> Option<&Arc<Run>> {
        self.runs.iter().find(|run| run.run_id == run_id)
    }

    pub fn runs(&self) -> &[Arc<Run>] {
        &self.runs
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Run>> {
        self.runs.iter()
    }

    /// Cheap copy for the presentation layer.
    pub fn snapshot(&self) -> Vec<Arc<Run>> {
        self.runs.clone()
    }

    pub fn running_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|run| run.status == RunStatus::Running)
            .count()
    }

    /// Apply one event in place.
    pub fn apply(
        &mut self,
        event: &RunEvent,
        now: DateTime<Utc>,
        policy: RunCreationPolicy,
    ) -> ReduceOutcome {
        let Some(run_id) = event.run_id.as_deref() else {
            return ReduceOutcome::Ignored(IgnoreReason::NoRunId);
        };
        if !is_run_event(&event.event_type) {
            return ReduceOutcome::Ignored(IgnoreReason::UnhandledType);
        }

        let Some(index) = self.runs.iter().position(|run| run.run_id == run_id) else {
            if event.event_type != EventType::RunStarted && policy == RunCreationPolicy::Strict {
                tracing::warn!(
                    run_id,
                    event_type = %event.event_type,
                    "event for unknown run ignored"
                );
                return ReduceOutcome::Ignored(IgnoreReason::UnknownRun);
            }
            let mut run = Run::new(run_id, event.thread_id.clone(), now);
            if let Err(reason) = apply_effect(&mut run, event, now) {
                tracing::debug!(run_id, ?reason, "new run created without applying event");
            }
            tracing::debug!(run_id, event_type = %event.event_type, "run created");
            self.runs.insert(0, Arc::new(run));
            return ReduceOutcome::Created;
        };

        let current = &self.runs[index];
        if current.is_terminal() {
            if event.event_type == EventType::RunStarted {
                tracing::warn!(
                    run_id,
                    status = %current.status,
                    "ignoring RUN_STARTED for a run that already ended"
                );
            } else {
                tracing::debug!(
                    run_id,
                    event_type = %event.event_type,
                    "ignoring event for a run that already ended"
                );
            }
            return ReduceOutcome::Ignored(IgnoreReason::Terminal);
        }

        let mut next = Run::clone(current);
        match apply_effect(&mut next, event, now) {
            Ok(()) => {
                self.runs[index] = Arc::new(next);
                ReduceOutcome::Updated
            }
            Err(reason) => ReduceOutcome::Ignored(reason),
        }
    }
}

/// Pure form of [`RunCollection::apply`]: the input collection is left as is.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use clawpilot::events::RunEvent;
/// use clawpilot::run::{reduce, RunCollection, RunCreationPolicy, RunStatus};
///
/// let now = Utc::now();
/// let empty = RunCollection::new();
/// let started = reduce(&empty, &RunEvent::run_started("r1", "main"), now, RunCreationPolicy::Lenient);
/// assert!(empty.is_empty());
/// assert_eq!(started.get("r1").unwrap().status, RunStatus::Running);
/// ```
pub fn reduce(
    runs: &RunCollection,
    event: &RunEvent,
    now: DateTime<Utc>,
    policy: RunCreationPolicy,
) -> RunCollection {
    let mut next = runs.clone();
    next.apply(event, now, policy);
    next
}

fn is_run_event(event_type: &EventType) -> bool {
    matches!(
        event_type,
        EventType::RunStarted
            | EventType::TextMessageContent
            | EventType::StepStarted
            | EventType::StepFinished
            | EventType::RunFinished
            | EventType::RunError
    )
}

fn apply_effect(run: &mut Run, event: &RunEvent, now: DateTime<Utc>) -> Result<(), IgnoreReason> {
    match event.event_type {
        EventType::RunStarted => {
            run.status = RunStatus::Running;
            if run.thread_id.is_none() {
                run.thread_id = event.thread_id.clone();
            }
        }
        EventType::TextMessageContent => {
            let delta = event
                .delta
                .clone()
                .ok_or(IgnoreReason::MissingField("delta"))?;
            run.messages.push(delta);
        }
        EventType::StepStarted => {
            let name = event
                .step_name
                .clone()
                .ok_or(IgnoreReason::MissingField("stepName"))?;
            run.steps.push(Step::started(name));
        }
        EventType::StepFinished => {
            let name = event.step_name.as_deref();
            match run.steps.last_mut() {
                Some(step) if Some(step.name.as_str()) == name => {
                    step.duration = StepDuration::Completed;
                }
                _ => return Err(IgnoreReason::StepMismatch),
            }
        }
        EventType::RunFinished => {
            run.status = RunStatus::Finished;
            run.finished_at = Some(now);
        }
        EventType::RunError => {
            run.status = RunStatus::Error;
            run.error = Some(
                event
                    .message
                    .clone()
                    .unwrap_or_else(|| "run failed".to_string()),
            );
            run.finished_at = Some(now);
        }
        _ => return Err(IgnoreReason::UnhandledType),
    }
    Ok(())
}

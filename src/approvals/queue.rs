//! Pending approvals with a decision handle per tool call.
//!
//! Each registered call gets a `oneshot` channel. Approving or rejecting
//! removes the entry and completes the handle, so the code that paused on the
//! tool call resumes with the operator's decision.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::ClawPilotError;

use super::types::{is_risky, PendingToolCall, ToolDecision, UNKNOWN_RUN_ID};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("approval queue dropped the pending call before a decision was made")]
    Abandoned,
}

impl From<DecisionError> for ClawPilotError {
    fn from(error: DecisionError) -> Self {
        ClawPilotError::InvalidState(error.to_string())
    }
}

/// Resolves once the operator approves or rejects the call.
#[derive(Debug)]
pub struct DecisionHandle {
    tool_call_id: String,
    rx: oneshot::Receiver<ToolDecision>,
}

impl DecisionHandle {
    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }
}

impl Future for DecisionHandle {
    type Output = Result<ToolDecision, DecisionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| DecisionError::Abandoned))
    }
}

/// A freshly registered call plus the handle to await its decision.
#[derive(Debug)]
pub struct PendingApproval {
    pub call: PendingToolCall,
    pub decision: DecisionHandle,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<PendingToolCall>,
    waiters: HashMap<String, oneshot::Sender<ToolDecision>>,
}

impl QueueState {
    fn contains(&self, tool_call_id: &str) -> bool {
        self.pending.iter().any(|c| c.tool_call_id == tool_call_id)
    }

    fn position(&self, tool_call_id: &str) -> Option<usize> {
        self.pending.iter().position(|c| c.tool_call_id == tool_call_id)
    }
}

/// Risky tool calls awaiting operator sign-off, in registration order.
#[derive(Debug, Default)]
pub struct ApprovalQueue {
    state: Mutex<QueueState>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a call under a generated `tool_<millis>` id.
    ///
    /// Returns `None` for tools outside the risky allow-list.
    pub fn register(
        &self,
        tool_name: &str,
        args: impl Into<String>,
        run_id: Option<&str>,
    ) -> Option<PendingApproval> {
        if !is_risky(tool_name) {
            return None;
        }
        let mut state = self.lock();
        let id = next_tool_call_id(&state, chrono::Utc::now().timestamp_millis());
        Some(insert(&mut state, id, tool_name, args.into(), run_id))
    }

    /// Register a call whose id came from the event stream.
    ///
    /// Returns `None` for non-risky tools or an id that is already pending.
    pub fn register_with_id(
        &self,
        tool_call_id: impl Into<String>,
        tool_name: &str,
        args: impl Into<String>,
        run_id: Option<&str>,
    ) -> Option<PendingApproval> {
        if !is_risky(tool_name) {
            return None;
        }
        self.register_required(tool_call_id, tool_name, args, run_id)
    }

    /// Register a call the gateway flagged for approval, whatever its name.
    ///
    /// Returns `None` for an id that is already pending.
    pub fn register_required(
        &self,
        tool_call_id: impl Into<String>,
        tool_name: &str,
        args: impl Into<String>,
        run_id: Option<&str>,
    ) -> Option<PendingApproval> {
        let tool_call_id = tool_call_id.into();
        let mut state = self.lock();
        if state.contains(&tool_call_id) {
            tracing::warn!(tool_call_id = %tool_call_id, "tool call already pending");
            return None;
        }
        Some(insert(&mut state, tool_call_id, tool_name, args.into(), run_id))
    }

    /// Append a streamed argument fragment to a pending call.
    pub fn append_args(&self, tool_call_id: &str, delta: &str) -> bool {
        let mut state = self.lock();
        match state.position(tool_call_id) {
            Some(index) => {
                state.pending[index].args.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Attach a run to a call that was registered as `"unknown"`.
    pub fn correlate(&self, tool_call_id: &str, run_id: &str) -> bool {
        let mut state = self.lock();
        match state.position(tool_call_id) {
            Some(index) if !state.pending[index].is_correlated() => {
                state.pending[index].run_id = run_id.to_string();
                true
            }
            _ => false,
        }
    }

    /// Remove a call and hand the decision to whoever awaits it.
    ///
    /// Unknown ids are a no-op and return `None`.
    pub fn decide(&self, tool_call_id: &str, decision: ToolDecision) -> Option<PendingToolCall> {
        let (call, waiter) = {
            let mut state = self.lock();
            let index = state.position(tool_call_id)?;
            let call = state.pending.remove(index);
            let waiter = state.waiters.remove(tool_call_id);
            (call, waiter)
        };
        tracing::info!(
            tool_call_id,
            tool = %call.tool_call_name,
            run_id = %call.run_id,
            action = %decision.action(),
            "tool call decided"
        );
        if let Some(waiter) = waiter {
            if waiter.send(decision).is_err() {
                tracing::debug!(tool_call_id, "nobody is waiting on this decision anymore");
            }
        }
        Some(call)
    }

    /// Drop a call that was resolved elsewhere. Its handle resolves to
    /// [`DecisionError::Abandoned`].
    pub fn withdraw(&self, tool_call_id: &str) -> Option<PendingToolCall> {
        let mut state = self.lock();
        let index = state.position(tool_call_id)?;
        state.waiters.remove(tool_call_id);
        let call = state.pending.remove(index);
        tracing::debug!(tool_call_id, "pending tool call withdrawn");
        Some(call)
    }

    pub fn approve(&self, tool_call_id: &str, result: impl Into<String>) -> bool {
        self.decide(tool_call_id, ToolDecision::approved(result))
            .is_some()
    }

    pub fn reject(&self, tool_call_id: &str, reason: impl Into<String>) -> bool {
        self.decide(tool_call_id, ToolDecision::rejected(reason))
            .is_some()
    }

    /// Snapshot of the pending calls.
    pub fn pending(&self) -> Vec<PendingToolCall> {
        self.lock().pending.clone()
    }

    pub fn get(&self, tool_call_id: &str) -> Option<PendingToolCall> {
        let state = self.lock();
        state
            .position(tool_call_id)
            .map(|index| state.pending[index].clone())
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }
}

fn insert(
    state: &mut QueueState,
    tool_call_id: String,
    tool_name: &str,
    args: String,
    run_id: Option<&str>,
) -> PendingApproval {
    let call = PendingToolCall {
        tool_call_id: tool_call_id.clone(),
        tool_call_name: tool_name.to_string(),
        args,
        run_id: run_id.unwrap_or(UNKNOWN_RUN_ID).to_string(),
    };
    let (tx, rx) = oneshot::channel();
    state.pending.push(call.clone());
    state.waiters.insert(tool_call_id.clone(), tx);
    tracing::info!(
        tool_call_id = %tool_call_id,
        tool = tool_name,
        run_id = %call.run_id,
        "tool call awaiting approval"
    );
    PendingApproval {
        call,
        decision: DecisionHandle { tool_call_id, rx },
    }
}

fn next_tool_call_id(state: &QueueState, millis: i64) -> String {
    let base = format!("tool_{millis}");
    if !state.contains(&base) {
        return base;
    }
    (1u32..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !state.contains(candidate))
        .unwrap_or(base)
}

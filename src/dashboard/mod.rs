//! Operator dashboard session.
//!
//! Feeds gateway events through the run reducer, queues risky tool calls for
//! approval, and publishes a [`DashboardSnapshot`] after every change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::approvals::{
    ApprovalQueue, DecisionHandle, PendingToolCall, ToolDecision, UNKNOWN_RUN_ID,
};
use crate::config::ClawPilotConfig;
use crate::error::{ClawPilotError, Result};
use crate::events::{EventType, RunEvent};
use crate::gateway::{AgentTransport, DecisionSink, EventStream, RunAgentInput};
use crate::run::{ReduceOutcome, Run, RunCollection, RunCreationPolicy};

/// What the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    /// Most recent first.
    pub runs: Vec<Arc<Run>>,
    pub pending: Vec<PendingToolCall>,
    /// A gateway event stream is being consumed.
    pub is_running: bool,
}

/// How [`Dashboard::consume`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeEnd {
    StreamEnded,
    Cancelled,
    TransportError,
}

/// Run list plus approval queue for one gateway connection.
pub struct Dashboard {
    runs: Mutex<RunCollection>,
    approvals: ApprovalQueue,
    handles: Mutex<HashMap<String, DecisionHandle>>,
    policy: RunCreationPolicy,
    sink: Option<Arc<dyn DecisionSink>>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new(RunCreationPolicy::default())
    }
}

impl Dashboard {
    pub fn new(policy: RunCreationPolicy) -> Self {
        let (snapshot_tx, _) = watch::channel(DashboardSnapshot::default());
        Self {
            runs: Mutex::new(RunCollection::new()),
            approvals: ApprovalQueue::new(),
            handles: Mutex::new(HashMap::new()),
            policy,
            sink: None,
            snapshot_tx,
        }
    }

    pub fn from_config(config: &ClawPilotConfig) -> Self {
        Self::new(config.run_creation)
    }

    /// Forward decisions to the gateway through `sink`.
    pub fn with_decision_sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn policy(&self) -> RunCreationPolicy {
        self.policy
    }

    pub fn approvals(&self) -> &ApprovalQueue {
        &self.approvals
    }

    fn lock_runs(&self) -> MutexGuard<'_, RunCollection> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<String, DecisionHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one gateway event.
    pub fn handle_event(&self, event: &RunEvent) {
        let outcome = self.lock_runs().apply(event, Utc::now(), self.policy);
        let queued = self.track_tool_call(event);

        if let ReduceOutcome::Ignored(reason) = outcome {
            if !queued {
                tracing::trace!(event_type = %event.event_type, ?reason, "event ignored");
                return;
            }
        }
        self.publish();
    }

    fn track_tool_call(&self, event: &RunEvent) -> bool {
        let Some(tool_call_id) = event.tool_call_id.as_deref() else {
            return false;
        };
        match event.event_type {
            EventType::ToolCallStart => {
                let name = event.tool_call_name.as_deref().unwrap_or_default();
                let run_id = event.run_id.as_deref();
                let registered = if event.requires_approval() {
                    self.approvals
                        .register_required(tool_call_id, name, String::new(), run_id)
                } else {
                    self.approvals
                        .register_with_id(tool_call_id, name, String::new(), run_id)
                };
                let Some(pending) = registered else {
                    return false;
                };
                self.lock_handles()
                    .insert(tool_call_id.to_string(), pending.decision);
                true
            }
            EventType::ToolCallArgs => {
                let mut changed = event
                    .delta
                    .as_deref()
                    .is_some_and(|delta| self.approvals.append_args(tool_call_id, delta));
                if let Some(run_id) = event.run_id.as_deref() {
                    changed |= self.approvals.correlate(tool_call_id, run_id);
                }
                changed
            }
            EventType::ToolCallEnd => event
                .run_id
                .as_deref()
                .is_some_and(|run_id| self.approvals.correlate(tool_call_id, run_id)),
            // The gateway settled the call without us.
            EventType::ToolCallResult => {
                let withdrawn = self.approvals.withdraw(tool_call_id).is_some();
                if withdrawn {
                    self.lock_handles().remove(tool_call_id);
                }
                withdrawn
            }
            _ => false,
        }
    }

    /// Apply events from `stream` until it ends, fails, or `cancel` fires.
    pub async fn consume(&self, mut stream: EventStream, cancel: CancellationToken) -> ConsumeEnd {
        self.set_running(true);
        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("event consumption cancelled");
                    break ConsumeEnd::Cancelled;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle_event(&event),
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "gateway event stream failed");
                        break ConsumeEnd::TransportError;
                    }
                    None => break ConsumeEnd::StreamEnded,
                },
            }
        };
        self.set_running(false);
        end
    }

    /// Open a run on `transport` and consume its events.
    pub async fn run(
        &self,
        transport: &dyn AgentTransport,
        input: RunAgentInput,
        cancel: CancellationToken,
    ) -> Result<ConsumeEnd> {
        let stream = transport.run(input).await?;
        Ok(self.consume(stream, cancel).await)
    }

    pub async fn approve(&self, tool_call_id: &str, result: impl Into<String>) -> Result<()> {
        self.decide(tool_call_id, ToolDecision::approved(result)).await
    }

    pub async fn reject(&self, tool_call_id: &str, reason: impl Into<String>) -> Result<()> {
        self.decide(tool_call_id, ToolDecision::rejected(reason)).await
    }

    /// Remove the call from the queue, resolve its handle, then notify the gateway.
    ///
    /// Unknown ids are a no-op. The local queue is updated even when the
    /// gateway submission fails.
    pub async fn decide(&self, tool_call_id: &str, decision: ToolDecision) -> Result<()> {
        let message = decision.to_message(tool_call_id);
        let Some(call) = self.approvals.decide(tool_call_id, decision) else {
            tracing::debug!(tool_call_id, "no pending tool call with this id");
            return Ok(());
        };
        // Already resolved; a caller that took it earlier still gets the decision.
        self.lock_handles().remove(tool_call_id);
        self.publish();

        let Some(sink) = self.sink.as_ref() else {
            return Ok(());
        };
        if call.run_id == UNKNOWN_RUN_ID {
            tracing::warn!(tool_call_id, "decision not sent, tool call has no run");
            return Ok(());
        }
        sink.submit(&call.run_id, &message).await
    }

    /// Take the handle that resolves when `tool_call_id` is decided.
    pub fn take_decision_handle(&self, tool_call_id: &str) -> Option<DecisionHandle> {
        self.lock_handles().remove(tool_call_id)
    }

    /// Wait for the decision on `tool_call_id`.
    pub async fn wait_for_decision(&self, tool_call_id: &str) -> Result<ToolDecision> {
        let handle = self
            .take_decision_handle(tool_call_id)
            .ok_or_else(|| ClawPilotError::UnknownToolCall(tool_call_id.to_string()))?;
        Ok(handle.await?)
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Snapshots as a stream, starting with the current one.
    pub fn snapshot_stream(&self) -> WatchStream<DashboardSnapshot> {
        WatchStream::new(self.subscribe())
    }

    fn set_running(&self, running: bool) {
        self.snapshot_tx.send_modify(|snapshot| snapshot.is_running = running);
    }

    fn publish(&self) {
        let runs = self.lock_runs().snapshot();
        let pending = self.approvals.pending();
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.runs = runs;
            snapshot.pending = pending;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::ToolDecisionMessage;
    use crate::run::RunStatus;
    use async_trait::async_trait;
    use futures::stream;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, ToolDecisionMessage)>>,
    }

    #[async_trait]
    impl DecisionSink for RecordingSink {
        async fn submit(&self, run_id: &str, message: &ToolDecisionMessage) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((run_id.to_string(), message.clone()));
            Ok(())
        }
    }

    fn events(items: Vec<RunEvent>) -> EventStream {
        Box::pin(stream::iter(items.into_iter().map(Ok)))
    }

    #[test]
    fn events_update_snapshot() {
        let dashboard = Dashboard::default();
        dashboard.handle_event(&RunEvent::run_started("r1", "main"));
        dashboard.handle_event(&RunEvent::text_delta("r1", "Hi"));

        let snapshot = dashboard.snapshot();
        assert_eq!(snapshot.runs.len(), 1);
        assert_eq!(snapshot.runs[0].transcript(), "Hi");
        assert!(!snapshot.is_running);
    }

    #[test]
    fn risky_tool_start_is_queued_with_args() {
        let dashboard = Dashboard::default();
        dashboard.handle_event(&RunEvent::run_started("r1", "main"));
        dashboard.handle_event(&RunEvent::tool_call_start("r1", "call-1", "shell"));
        dashboard.handle_event(&RunEvent::tool_call_args("r1", "call-1", "{\"cmd\":"));
        dashboard.handle_event(&RunEvent::tool_call_args("r1", "call-1", "\"ls\"}"));
        dashboard.handle_event(&RunEvent::tool_call_start("r1", "call-2", "search"));

        let pending = dashboard.snapshot().pending;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_call_id, "call-1");
        assert_eq!(pending[0].run_id, "r1");
        assert_eq!(pending[0].args, "{\"cmd\":\"ls\"}");
    }

    #[test]
    fn flagged_calls_queue_and_results_withdraw_them() {
        let dashboard = Dashboard::default();
        dashboard.handle_event(&RunEvent::run_started("r1", "main"));
        dashboard.handle_event(
            &RunEvent::tool_call_start("r1", "call-1", "search").with_requires_approval(),
        );
        assert_eq!(dashboard.snapshot().pending[0].tool_call_name, "search");

        dashboard.handle_event(&RunEvent::tool_call_result("r1", "call-1", "approved"));
        assert!(dashboard.snapshot().pending.is_empty());
        assert!(dashboard.take_decision_handle("call-1").is_none());
    }

    #[tokio::test]
    async fn approve_resolves_handle_and_submits() {
        let sink = Arc::new(RecordingSink::default());
        let dashboard = Dashboard::default().with_decision_sink(sink.clone());
        dashboard.handle_event(&RunEvent::tool_call_start("r1", "call-1", "email"));
        let handle = dashboard.take_decision_handle("call-1").unwrap();

        dashboard.approve("call-1", "sent").await.unwrap();

        assert_eq!(handle.await.unwrap(), ToolDecision::approved("sent"));
        assert!(dashboard.snapshot().pending.is_empty());
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "r1");
        assert_eq!(sent[0].1.payload, serde_json::json!({"result": "sent"}));
    }

    #[tokio::test]
    async fn decided_calls_release_their_handles() {
        let dashboard = Dashboard::default();
        for i in 0..20 {
            let id = format!("call-{i}");
            dashboard.handle_event(&RunEvent::tool_call_start("r1", id.as_str(), "shell"));
            if i % 2 == 0 {
                dashboard.approve(&id, "ok").await.unwrap();
            } else {
                dashboard.reject(&id, "no").await.unwrap();
            }
            assert!(dashboard.take_decision_handle(&id).is_none());
        }
        assert!(dashboard.lock_handles().is_empty());
        assert!(dashboard.snapshot().pending.is_empty());
    }

    #[tokio::test]
    async fn wait_for_decision_returns_operator_answer() {
        let dashboard = Arc::new(Dashboard::default());
        dashboard.handle_event(&RunEvent::tool_call_start("r1", "call-1", "write"));

        let waiter = {
            let dashboard = dashboard.clone();
            tokio::spawn(async move { dashboard.wait_for_decision("call-1").await })
        };
        while !dashboard.lock_handles().is_empty() {
            tokio::task::yield_now().await;
        }
        dashboard.reject("call-1", "read only").await.unwrap();

        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision, ToolDecision::rejected("read only"));
        assert!(matches!(
            dashboard.wait_for_decision("call-1").await,
            Err(ClawPilotError::UnknownToolCall(_))
        ));
    }

    #[tokio::test]
    async fn reject_unknown_id_is_noop() {
        let sink = Arc::new(RecordingSink::default());
        let dashboard = Dashboard::default().with_decision_sink(sink.clone());
        dashboard.reject("missing", "no").await.unwrap();
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn consume_runs_until_stream_ends() {
        let dashboard = Dashboard::default();
        let end = dashboard
            .consume(
                events(vec![
                    RunEvent::run_started("r1", "main"),
                    RunEvent::run_finished("r1"),
                ]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(end, ConsumeEnd::StreamEnded);
        let snapshot = dashboard.snapshot();
        assert_eq!(snapshot.runs[0].status, RunStatus::Finished);
        assert!(!snapshot.is_running);
    }

    #[tokio::test]
    async fn consume_stops_on_transport_error() {
        let dashboard = Dashboard::default();
        let stream: EventStream = Box::pin(stream::iter(vec![
            Ok(RunEvent::run_started("r1", "main")),
            Err(ClawPilotError::Stream("reset".into())),
            Ok(RunEvent::run_finished("r1")),
        ]));
        let end = dashboard.consume(stream, CancellationToken::new()).await;

        assert_eq!(end, ConsumeEnd::TransportError);
        assert_eq!(dashboard.snapshot().runs[0].status, RunStatus::Running);
    }

    #[tokio::test]
    async fn cancelled_token_stops_consumption() {
        let dashboard = Dashboard::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let end = dashboard
            .consume(Box::pin(stream::pending()), cancel)
            .await;
        assert_eq!(end, ConsumeEnd::Cancelled);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let dashboard = Dashboard::default();
        let mut rx = dashboard.subscribe();
        dashboard.handle_event(&RunEvent::run_started("r1", "main"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().runs.len(), 1);
    }
}

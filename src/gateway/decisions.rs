//! Sends the operator's tool-call decisions back to the gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;

use crate::approvals::{DecisionAction, ToolDecisionMessage, UNKNOWN_RUN_ID};
use crate::config::ClawPilotConfig;
use crate::error::{ClawPilotError, Result};

use super::http::{build_client, endpoint_url, gateway_headers, status_to_error};

/// Destination for decision messages.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn submit(&self, run_id: &str, message: &ToolDecisionMessage) -> Result<()>;
}

/// PATCH body; the tool call id travels in the path.
#[derive(Debug, Serialize)]
struct DecisionBody<'a> {
    action: DecisionAction,
    payload: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDecisionMessage> for DecisionBody<'a> {
    fn from(message: &'a ToolDecisionMessage) -> Self {
        Self {
            action: message.action,
            payload: &message.payload,
        }
    }
}

/// `PATCH {gateway}/runs/{runId}/tools/{toolCallId}` with `{action, payload}`.
#[derive(Debug, Clone)]
pub struct HttpDecisionSink {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpDecisionSink {
    pub fn new(config: &ClawPilotConfig) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: config.gateway_url.clone(),
            token: config.resolve_device_token(),
            timeout: config.request_timeout,
        })
    }

    /// Endpoint for one tool call; ids are percent-encoded as path segments.
    pub fn decision_url(&self, run_id: &str, tool_call_id: &str) -> Result<Url> {
        endpoint_url(&self.base_url, &["runs", run_id, "tools", tool_call_id])
    }
}

#[async_trait]
impl DecisionSink for HttpDecisionSink {
    async fn submit(&self, run_id: &str, message: &ToolDecisionMessage) -> Result<()> {
        if run_id == UNKNOWN_RUN_ID {
            return Err(ClawPilotError::InvalidState(format!(
                "tool call {} is not correlated with a run",
                message.tool_call_id
            )));
        }
        let url = self.decision_url(run_id, &message.tool_call_id)?;
        tracing::debug!(%url, action = %message.action, "submitting tool decision");

        let response = self
            .client
            .patch(url)
            .headers(gateway_headers(self.token.as_deref()))
            .timeout(self.timeout)
            .json(&DecisionBody::from(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error(status.as_u16(), &body));
        }
        Ok(())
    }
}

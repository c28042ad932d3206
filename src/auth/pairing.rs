//! Device pairing against the gateway.
//!
//! An unpaired client posts an empty body and receives `403 pairing_pending`
//! with a pairing code for the operator and a device token. The token is
//! stored right away, then the client polls with it until the gateway
//! accepts the request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::config::ClawPilotConfig;
use crate::error::{ClawPilotError, Result};
use crate::gateway::http::{build_client, gateway_headers, status_to_error};
use crate::util::{with_timeout, RetryPolicy};

use super::error::PairingError;
use super::store::{DeviceToken, DeviceTokenStore, FileDeviceTokenStore};

const PAIRING_PENDING: &str = "pairing_pending";

/// A pairing request waiting for operator approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSession {
    /// Code the operator confirms on the gateway side.
    pub pairing_code: Option<String>,
    pub token: String,
    pub started_at: DateTime<Utc>,
}

/// Result of the initial pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingStart {
    Pending(PairingSession),
    /// The gateway accepted the request without pairing.
    AlreadyApproved,
}

/// Result of one approval poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPoll {
    Pending,
    Approved,
}

/// How [`PairingClient::pair`] finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// An approved token was already stored; no request was made.
    AlreadyPaired(DeviceToken),
    Approved(DeviceToken),
    /// The gateway does not require pairing.
    NotRequired,
}

impl PairingOutcome {
    pub fn token(&self) -> Option<&DeviceToken> {
        match self {
            Self::AlreadyPaired(token) | Self::Approved(token) => Some(token),
            Self::NotRequired => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PendingBody {
    error: PendingError,
}

#[derive(Debug, Deserialize)]
struct PendingError {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    pairing: Option<PendingPairing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingPairing {
    #[serde(default)]
    pairing_code: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// Runs the pairing handshake and keeps the device token in a store.
pub struct PairingClient {
    client: reqwest::Client,
    url: String,
    store: Arc<dyn DeviceTokenStore>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl PairingClient {
    pub fn new(config: &ClawPilotConfig) -> Result<Self> {
        let store = config
            .token_store
            .clone()
            .unwrap_or_else(|| Arc::new(FileDeviceTokenStore::new_default()));
        Ok(Self {
            client: build_client()?,
            url: config.gateway_url.clone(),
            store,
            poll_interval: config.pairing_poll_interval,
            max_wait: config.pairing_max_wait,
            request_timeout: config.request_timeout,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn DeviceTokenStore> {
        &self.store
    }

    /// Stored token, approved or still pending.
    pub fn stored_token(&self) -> Result<Option<DeviceToken>> {
        Ok(self.store.load()?)
    }

    /// Send the unauthenticated pairing request.
    pub async fn start(&self) -> Result<PairingStart> {
        let response = self
            .retry
            .execute(move || async move {
                self.client
                    .post(&self.url)
                    .headers(gateway_headers(None))
                    .timeout(self.request_timeout)
                    .json(&json!({}))
                    .send()
                    .await
                    .map_err(ClawPilotError::from)
            })
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("gateway accepted request without pairing");
            return Ok(PairingStart::AlreadyApproved);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() != 403 {
            return Err(status_to_error(status.as_u16(), &body));
        }

        let session = parse_pending(&body)?;
        let mut stored = DeviceToken::new(session.token.clone());
        stored.gateway_url = Some(self.url.clone());
        self.store.save(&stored)?;
        tracing::info!(
            pairing_code = session.pairing_code.as_deref().unwrap_or("-"),
            "pairing pending, device token stored"
        );
        Ok(PairingStart::Pending(session))
    }

    /// Ask whether the gateway has approved `session` yet.
    pub async fn poll(&self, session: &PairingSession) -> Result<PairingPoll> {
        let response = self
            .client
            .post(&self.url)
            .headers(gateway_headers(Some(&session.token)))
            .timeout(self.request_timeout)
            .json(&json!({ "messages": [{ "role": "user", "content": "ping" }] }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(PairingPoll::Approved);
        }
        if status.as_u16() == 403 {
            return Ok(PairingPoll::Pending);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_to_error(status.as_u16(), &body))
    }

    /// Poll until approved, bounded by the configured `max_wait`.
    pub async fn wait_for_approval(&self, session: &PairingSession) -> Result<DeviceToken> {
        with_timeout(self.max_wait, async {
            loop {
                tokio::time::sleep(self.poll_interval).await;
                match self.poll(session).await {
                    Ok(PairingPoll::Approved) => break,
                    Ok(PairingPoll::Pending) => tracing::debug!("pairing still pending"),
                    Err(err) => tracing::warn!(error = %err, "pairing poll failed"),
                }
            }
            Ok(())
        })
        .await?;

        let mut token = DeviceToken::new(session.token.clone());
        token.gateway_url = Some(self.url.clone());
        token.paired_at = Some(Utc::now());
        self.store.save(&token)?;
        tracing::info!("device paired");
        Ok(token)
    }

    /// Pair this device, reusing a stored token when there is one.
    ///
    /// A stored token without `paired_at` was issued but never confirmed, so
    /// polling resumes with it instead of starting over. `on_pending` is
    /// called once with the session so the caller can show the pairing code
    /// to the operator.
    pub async fn pair<F>(&self, on_pending: F) -> Result<PairingOutcome>
    where
        F: FnOnce(&PairingSession),
    {
        if let Some(token) = self.stored_token()? {
            if token.paired_at.is_some() {
                tracing::debug!("using stored device token");
                return Ok(PairingOutcome::AlreadyPaired(token));
            }
            tracing::info!("stored device token was never approved, resuming pairing wait");
            let session = PairingSession {
                pairing_code: None,
                token: token.token,
                started_at: Utc::now(),
            };
            on_pending(&session);
            let token = self.wait_for_approval(&session).await?;
            return Ok(PairingOutcome::Approved(token));
        }

        match self.start().await? {
            PairingStart::AlreadyApproved => Ok(PairingOutcome::NotRequired),
            PairingStart::Pending(session) => {
                on_pending(&session);
                let token = self.wait_for_approval(&session).await?;
                Ok(PairingOutcome::Approved(token))
            }
        }
    }

    /// Forget the stored device token.
    pub fn unpair(&self) -> Result<()> {
        self.store.clear()?;
        tracing::info!("device token cleared");
        Ok(())
    }
}

fn parse_pending(body: &str) -> std::result::Result<PairingSession, PairingError> {
    let parsed: PendingBody = serde_json::from_str(body)
        .map_err(|err| PairingError::InvalidResponse(format!("{err}: {body}")))?;
    if parsed.error.kind != PAIRING_PENDING {
        return Err(PairingError::Rejected { status: 403 });
    }
    let pairing = parsed
        .error
        .pairing
        .ok_or_else(|| PairingError::InvalidResponse("missing pairing details".into()))?;
    let token = pairing
        .token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| PairingError::InvalidResponse("missing pairing token".into()))?;
    Ok(PairingSession {
        pairing_code: pairing.pairing_code,
        token,
        started_at: Utc::now(),
    })
}

//! Configuration (layered: code > env > device token store).
//!
//! Everything the transport, pairing and socket adapters need is carried in an
//! explicit [`ClawPilotConfig`]. Nothing in the reducer reads configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;

use crate::auth::store::{DeviceTokenStore, FileDeviceTokenStore};
use crate::error::{ClawPilotError, Result};
use crate::run::RunCreationPolicy;

/// Gateway used when nothing else is configured.
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8000";
/// Thread every dashboard run is opened on unless overridden.
pub const DEFAULT_THREAD_ID: &str = "main";
/// Interval between pairing approval polls.
pub const DEFAULT_PAIRING_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Interval between run status polls on the REST transport.
pub const DEFAULT_RUN_POLL_INTERVAL: Duration = Duration::from_millis(1200);

/// Runtime configuration for the gateway adapters.
///
/// # Example
/// ```
/// use clawpilot::config::ClawPilotConfig;
///
/// let config = ClawPilotConfig::builder()
///     .gateway_url("http://localhost:18789/v1/clawg-ui")
///     .device_token("tok-123")
///     .build();
/// assert_eq!(config.thread_id, "main");
/// assert_eq!(config.resolve_device_token().as_deref(), Some("tok-123"));
/// ```
#[derive(Clone, Builder)]
pub struct ClawPilotConfig {
    /// AG-UI endpoint of the agent gateway (also used for pairing).
    #[builder(into, default = DEFAULT_GATEWAY_URL.to_string())]
    pub gateway_url: String,
    /// WebSocket endpoint used for skills and commands.
    #[builder(into)]
    pub gateway_ws_url: Option<String>,
    /// Explicit device token; wins over the token store.
    #[builder(into)]
    pub device_token: Option<String>,
    #[builder(into, default = DEFAULT_THREAD_ID.to_string())]
    pub thread_id: String,
    #[builder(default = DEFAULT_PAIRING_POLL_INTERVAL)]
    pub pairing_poll_interval: Duration,
    /// Upper bound on the whole pairing wait; `None` waits forever.
    pub pairing_max_wait: Option<Duration>,
    /// Reconnect attempts delegated to the SSE client (0 disables reconnects).
    #[builder(default = 0)]
    pub stream_max_reconnects: usize,
    #[builder(default = DEFAULT_RUN_POLL_INTERVAL)]
    pub run_poll_interval: Duration,
    #[builder(default = Duration::from_secs(120))]
    pub request_timeout: Duration,
    #[builder(default)]
    pub run_creation: RunCreationPolicy,
    pub token_store: Option<Arc<dyn DeviceTokenStore>>,
}

impl fmt::Debug for ClawPilotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClawPilotConfig")
            .field("gateway_url", &self.gateway_url)
            .field("gateway_ws_url", &self.gateway_ws_url)
            .field("device_token", &self.device_token.as_ref().map(|_| "<redacted>"))
            .field("thread_id", &self.thread_id)
            .field("pairing_poll_interval", &self.pairing_poll_interval)
            .field("pairing_max_wait", &self.pairing_max_wait)
            .field("stream_max_reconnects", &self.stream_max_reconnects)
            .field("run_poll_interval", &self.run_poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("run_creation", &self.run_creation)
            .field("token_store", &self.token_store.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for ClawPilotConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClawPilotConfig {
    /// Load from environment variables, after reading `.env` if present.
    ///
    /// Recognised variables: `CLAWPILOT_GATEWAY_URL`, `CLAWPILOT_GATEWAY_WS_URL`,
    /// `CLAWPILOT_DEVICE_TOKEN`, `CLAWPILOT_THREAD_ID`,
    /// `CLAWPILOT_STREAM_RECONNECTS`, `CLAWPILOT_RUN_CREATION`,
    /// `CLAWPILOT_RUN_POLL_MS`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let run_creation = get("CLAWPILOT_RUN_CREATION")
            .and_then(|raw| match raw.parse::<RunCreationPolicy>() {
                Ok(policy) => Some(policy),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unknown CLAWPILOT_RUN_CREATION");
                    None
                }
            })
            .unwrap_or_default();
        let stream_max_reconnects = get("CLAWPILOT_STREAM_RECONNECTS")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        let run_poll_interval = get("CLAWPILOT_RUN_POLL_MS")
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RUN_POLL_INTERVAL);

        Self::builder()
            .gateway_url(get("CLAWPILOT_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.into()))
            .maybe_gateway_ws_url(get("CLAWPILOT_GATEWAY_WS_URL"))
            .maybe_device_token(get("CLAWPILOT_DEVICE_TOKEN"))
            .thread_id(get("CLAWPILOT_THREAD_ID").unwrap_or_else(|| DEFAULT_THREAD_ID.into()))
            .stream_max_reconnects(stream_max_reconnects)
            .run_poll_interval(run_poll_interval)
            .run_creation(run_creation)
            .token_store(Arc::new(FileDeviceTokenStore::new_default()) as Arc<dyn DeviceTokenStore>)
            .build()
    }

    /// Replace the token store (or `None` to disable the fallback).
    pub fn with_token_store(mut self, store: Option<Arc<dyn DeviceTokenStore>>) -> Self {
        self.token_store = store;
        self
    }

    /// Resolve the device token: explicit value first, then the token store.
    pub fn resolve_device_token(&self) -> Option<String> {
        if let Some(token) = self.device_token.clone() {
            return Some(token);
        }
        let store = self.token_store.as_ref()?;
        match store.load() {
            Ok(Some(stored)) => Some(stored.token),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read stored device token");
                None
            }
        }
    }

    /// Like [`resolve_device_token`](Self::resolve_device_token) but an error when unpaired.
    pub fn require_device_token(&self) -> Result<String> {
        self.resolve_device_token()
            .ok_or_else(|| ClawPilotError::Pairing(crate::auth::PairingError::NotPaired))
    }

    /// WebSocket URL, or a configuration error when none is set.
    pub fn require_ws_url(&self) -> Result<&str> {
        self.gateway_ws_url
            .as_deref()
            .ok_or_else(|| ClawPilotError::Configuration("gateway WebSocket URL is not set".into()))
    }
}

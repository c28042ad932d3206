//! Shared test helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use clawpilot::auth::{DeviceTokenStore, MemoryDeviceTokenStore};
use clawpilot::config::ClawPilotConfig;
use serde_json::Value;

/// Config pointed at a mock gateway, with an in-memory token store and fast polling.
pub fn test_config(gateway_url: &str, store: Arc<MemoryDeviceTokenStore>) -> ClawPilotConfig {
    ClawPilotConfig::builder()
        .gateway_url(gateway_url)
        .pairing_poll_interval(Duration::from_millis(10))
        .pairing_max_wait(Duration::from_secs(5))
        .run_poll_interval(Duration::from_millis(10))
        .request_timeout(Duration::from_secs(5))
        .token_store(store as Arc<dyn DeviceTokenStore>)
        .build()
}

/// Render JSON values as an SSE body, one `data:` frame per value.
pub fn sse_body(events: &[Value]) -> String {
    events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect()
}

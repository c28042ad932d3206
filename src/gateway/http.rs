//! Shared HTTP plumbing for talking to the gateway.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;

use crate::error::{ClawPilotError, Result};

/// Build the client used for all gateway traffic.
///
/// Only connection setup is bounded here; one-shot requests set their own
/// timeout so long-lived event streams are not cut off.
pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .build()
        .map_err(ClawPilotError::from)
}

/// JSON headers, with a bearer token when one is known.
pub fn gateway_headers(token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(token) = token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
    }
    headers
}

/// Append percent-encoded path segments to the gateway base URL.
pub fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|err| ClawPilotError::Configuration(format!("invalid gateway URL: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| ClawPilotError::Configuration("gateway URL cannot have a path".into()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turn a non-success gateway response into an error, keeping the body text.
pub fn status_to_error(status: u16, body: &str) -> ClawPilotError {
    let message = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
    ClawPilotError::api(status, message)
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_added_only_with_token() {
        let headers = gateway_headers(Some("tok"));
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
        assert!(gateway_headers(None).get(AUTHORIZATION).is_none());
    }

    #[test]
    fn error_message_is_pulled_from_json_bodies() {
        let err = status_to_error(500, r#"{"error":{"message":"agent crashed"}}"#);
        assert_eq!(err.to_string(), "Gateway error (status 500): agent crashed");

        let err = status_to_error(400, r#"{"error":"bad input"}"#);
        assert_eq!(err.to_string(), "Gateway error (status 400): bad input");

        let err = status_to_error(502, "upstream down\n");
        assert_eq!(err.to_string(), "Gateway error (status 502): upstream down");
    }
}

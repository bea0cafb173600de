//! Transport layer for TSE device communication.
//!
//! Defines the `DeviceTransport` trait (one labeled request/response per
//! call) and the HTTP implementation backed by `reqwest`. The transport owns
//! no protocol state: no batching, retries, or caching.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::TseError;
use super::protocol::Operation;

/// Default timeout for device requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Performs a single remote operation against the TSE device.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Issue `operation` with an optional JSON body and return the decoded
    /// response body. Empty bodies decode to `Value::Null`, non-JSON bodies
    /// to `Value::String`.
    async fn call(&self, operation: Operation, body: Option<Value>) -> Result<Value, TseError>;

    /// Human-readable description of the connection target.
    fn description(&self) -> String;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the device host:
/// - trim whitespace
/// - ensure a scheme is present (devices on the LAN speak plain http)
/// - strip trailing slashes
///
/// A host that is blank, or a bare scheme, is a configuration error.
pub fn normalize_device_host(host: &str) -> Result<String, TseError> {
    let raw = host.trim();
    let (scheme, rest) = if let Some(rest) = raw.strip_prefix("https://") {
        ("https://", rest)
    } else if let Some(rest) = raw.strip_prefix("http://") {
        ("http://", rest)
    } else {
        ("http://", raw)
    };

    let rest = rest.trim().trim_end_matches('/');
    if rest.is_empty() || rest.starts_with('/') || matches!(rest, "http:" | "https:") {
        return Err(TseError::Config(format!("device host is empty: '{host}'")));
    }

    Ok(format!("{scheme}{rest}"))
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// HTTP transport: commands are POSTed, status queries fetched with GET.
pub struct HttpTransport {
    host: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(host: &str, timeout: Duration) -> Result<Self, TseError> {
        let host = normalize_device_host(host)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TseError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { host, client })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, operation: Operation) -> String {
        format!("{}/{}", self.host, operation.path())
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn call(&self, operation: Operation, body: Option<Value>) -> Result<Value, TseError> {
        let url = self.url(operation);
        debug!(%operation, %url, "TSE request");

        let mut req = if operation.is_query() {
            self.client.get(&url)
        } else {
            self.client.post(&url)
        };
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req.send().await.map_err(|e| TseError::Backend {
            operation,
            status: None,
            detail: transport_error(&self.host, &e),
        })?;
        let status = resp.status();
        let body_text = resp.text().await.map_err(|e| TseError::Backend {
            operation,
            status: Some(status.as_u16()),
            detail: format!(
                "Failed to read TSE response body (HTTP {}): {e}",
                status.as_u16()
            ),
        })?;

        if !status.is_success() {
            warn!(%operation, status = status.as_u16(), "TSE rejected request");
            return Err(TseError::Backend {
                operation,
                status: Some(status.as_u16()),
                detail: failure_detail(status, &body_text),
            });
        }

        Ok(decode_body(&body_text))
    }

    fn description(&self) -> String {
        format!("TSE device at {}", self.host)
    }
}

// ---------------------------------------------------------------------------
// Error and body mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a diagnostic that keeps the raw error text.
fn transport_error(host: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach TSE device at {host}: {err}");
    }
    if err.is_timeout() {
        return format!("Connection to TSE device at {host} timed out: {err}");
    }
    format!("Network error communicating with {host}: {err}")
}

/// The device's own diagnostic body wins; the status line is only a fallback.
fn failure_detail(status: StatusCode, body_text: &str) -> String {
    if body_text.trim().is_empty() {
        format!("TSE device returned HTTP {}", status.as_u16())
    } else {
        body_text.to_string()
    }
}

fn decode_body(body_text: &str) -> Value {
    if body_text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body_text).unwrap_or_else(|_| Value::String(body_text.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! TSE client configuration.
//!
//! Backend selection is a construction-time choice made here, never an
//! ambient flag. Configuration arrives as a JSON object (terminal settings
//! synced from the admin dashboard) and is read with defaults for every
//! optional key.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tse::error::TseError;
use crate::tse::protocol::ProtocolVariant;
use crate::tse::simulator::UnknownTransactionPolicy;
use crate::tse::transport::{normalize_device_host, DEFAULT_TIMEOUT};

/// Which backend the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackendKind {
    /// Physical TSE reachable over HTTP.
    Device { host: String },
    /// In-memory simulator (no hardware).
    Simulator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TseConfig {
    pub backend: BackendKind,
    pub protocol_variant: ProtocolVariant,
    pub request_timeout_ms: u64,
    /// Only consulted by the simulator.
    pub unknown_transaction_policy: UnknownTransactionPolicy,
}

impl TseConfig {
    /// Device backend at `host`. Fails when the host is blank.
    pub fn device(host: &str) -> Result<Self, TseError> {
        Ok(Self {
            backend: BackendKind::Device {
                host: normalize_device_host(host)?,
            },
            ..Self::simulator()
        })
    }

    pub fn simulator() -> Self {
        Self {
            backend: BackendKind::Simulator,
            protocol_variant: ProtocolVariant::default(),
            request_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            unknown_transaction_policy: UnknownTransactionPolicy::default(),
        }
    }

    pub fn with_variant(mut self, variant: ProtocolVariant) -> Self {
        self.protocol_variant = variant;
        self
    }

    pub fn with_unknown_transaction_policy(mut self, policy: UnknownTransactionPolicy) -> Self {
        self.unknown_transaction_policy = policy;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Read configuration from a JSON object.
    ///
    /// Keys: `mode` ("device" | "simulator", default "device"), `deviceHost`
    /// (required in device mode), `protocolVariant`, `requestTimeoutMs`,
    /// `unknownTransactionPolicy`.
    pub fn from_json(config: &Value) -> Result<Self, TseError> {
        if !config.is_object() {
            return Err(TseError::Config("expected a JSON object".into()));
        }

        let mode = config
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("device");
        let mut out = match mode {
            "device" => {
                let host = config
                    .get("deviceHost")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| TseError::Config("deviceHost is required in device mode".into()))?;
                Self::device(host)?
            }
            "simulator" => Self::simulator(),
            other => {
                return Err(TseError::Config(format!(
                    "Unsupported mode: '{other}'. Supported: device, simulator"
                )))
            }
        };

        if let Some(raw) = config.get("protocolVariant").and_then(Value::as_str) {
            out.protocol_variant = ProtocolVariant::parse(raw).ok_or_else(|| {
                TseError::Config(format!("Unsupported protocolVariant: '{raw}'"))
            })?;
        }

        if let Some(timeout) = config.get("requestTimeoutMs") {
            out.request_timeout_ms = timeout
                .as_u64()
                .filter(|&ms| ms > 0)
                .ok_or_else(|| TseError::Config(format!("Invalid requestTimeoutMs: {timeout}")))?;
        }

        if let Some(raw) = config.get("unknownTransactionPolicy").and_then(Value::as_str) {
            out.unknown_transaction_policy =
                UnknownTransactionPolicy::parse(raw).ok_or_else(|| {
                    TseError::Config(format!("Unsupported unknownTransactionPolicy: '{raw}'"))
                })?;
        }

        Ok(out)
    }
}

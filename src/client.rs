//! TSE client facade.
//!
//! `TseClient` picks its backend once, at construction, from a `TseConfig`,
//! and exposes the unified protocol surface. Switching between the device and
//! the simulator changes only the realism of returned values, never the
//! operation contract.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{BackendKind, TseConfig};
use crate::tse::error::TseError;
use crate::tse::gateway::DeviceGateway;
use crate::tse::protocol::*;
use crate::tse::session::{SessionEngine, SessionState};
use crate::tse::simulator::Simulator;
use crate::tse::transport::HttpTransport;

/// Unified TSE client over either backend.
pub struct TseClient {
    engine: SessionEngine,
}

impl TseClient {
    /// Build the backend described by `config`.
    pub fn new(config: &TseConfig) -> Result<Self, TseError> {
        let backend: Arc<dyn TseBackend> = match &config.backend {
            BackendKind::Device { host } => {
                let transport = HttpTransport::new(host, config.request_timeout())?;
                info!(host = transport.host(), "TSE client using device backend");
                Arc::new(DeviceGateway::new(transport, config.protocol_variant))
            }
            BackendKind::Simulator => {
                info!(
                    policy = ?config.unknown_transaction_policy,
                    "TSE client using simulator backend"
                );
                Arc::new(Simulator::new(
                    config.protocol_variant,
                    config.unknown_transaction_policy,
                ))
            }
        };
        Ok(Self::with_backend(backend, config.protocol_variant))
    }

    /// Use a caller-supplied backend (custom transports, test doubles).
    pub fn with_backend(backend: Arc<dyn TseBackend>, variant: ProtocolVariant) -> Self {
        Self {
            engine: SessionEngine::new(backend, variant),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.engine.backend_name()
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.engine.variant()
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    pub fn setup_state(&self) -> Option<SetupState> {
        self.engine.setup_state()
    }

    // Administrative

    pub async fn self_test(&self, client_id: &str) -> Result<bool, TseError> {
        self.engine.self_test(Some(client_id)).await
    }

    pub async fn init(&self) -> Result<(), TseError> {
        self.engine.init().await
    }

    pub async fn setup(&self, request: &SetupRequest) -> Result<(), TseError> {
        self.engine.setup(request).await
    }

    pub async fn login_admin_user(&self, admin_pin: &str) -> Result<(), TseError> {
        self.engine.login_admin_user(Some(admin_pin)).await
    }

    pub async fn update_time(&self) -> Result<(), TseError> {
        self.engine.update_time().await
    }

    pub async fn factory_reset(&self) -> Result<(), TseError> {
        self.engine.factory_reset().await
    }

    pub async fn fast_init(&self, request: &FastInitRequest) -> Result<(), TseError> {
        self.engine.fast_init(request).await
    }

    // Transactions

    pub async fn start_transaction(
        &self,
        request: &StartTransactionRequest,
    ) -> Result<TransactionStart, TseError> {
        self.engine.start_transaction(request).await
    }

    pub async fn update_transaction(
        &self,
        request: &UpdateTransactionRequest,
    ) -> Result<LogRecord, TseError> {
        self.engine.update_transaction(request).await
    }

    pub async fn finish_transaction(
        &self,
        request: &FinishTransactionRequest,
    ) -> Result<LogRecord, TseError> {
        self.engine.finish_transaction(request).await
    }

    pub async fn start_and_finish_transaction(
        &self,
        request: &StartTransactionRequest,
    ) -> Result<StartAndFinish, TseError> {
        self.engine.start_and_finish_transaction(request).await
    }

    // Device identity

    pub async fn tse_public_key(&self) -> Result<String, TseError> {
        self.engine.public_key().await
    }

    pub async fn tse_serial_number(&self) -> Result<String, TseError> {
        self.engine.serial_number().await
    }

    pub async fn tse_signature_algorithm(&self) -> Result<String, TseError> {
        self.engine.signature_algorithm().await
    }

    pub async fn tse_certificate_exp_date(&self) -> Result<DateTime<Utc>, TseError> {
        self.engine.certificate_expiry().await
    }

    pub async fn log_message_certificate(&self) -> Result<String, TseError> {
        self.engine.log_message_certificate().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

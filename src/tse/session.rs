//! Session protocol engine.
//!
//! Drives the administrative state machine
//!
//! ```text
//! UNINITIALIZED --init--> INITIALIZED --selfTest--> SETUP_REQUIRED | READY
//! SETUP_REQUIRED --setup--> READY --loginAdminUser--> AUTHENTICATED
//! AUTHENTICATED --updateTime--> OPERATIONAL
//! ```
//!
//! and dispatches the per-transaction start/update/finish sub-protocol. Every
//! call is validated before the backend sees it. Backend failures are surfaced
//! verbatim: no retries, no rollback.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::TseError;
use super::protocol::*;
use super::validation;

/// Administrative state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initialized,
    SetupRequired,
    Ready,
    Authenticated,
    Operational,
}

#[derive(Debug)]
struct Progress {
    state: SessionState,
    setup: Option<SetupState>,
}

/// Validates, forwards, and tracks administrative progress against one backend.
///
/// The transaction sub-protocol is independent of the administrative state:
/// out-of-order administrative calls are still forwarded (the backend is
/// authoritative) but logged and leave the state unchanged.
pub struct SessionEngine {
    backend: Arc<dyn TseBackend>,
    variant: ProtocolVariant,
    progress: Mutex<Progress>,
}

impl SessionEngine {
    pub fn new(backend: Arc<dyn TseBackend>, variant: ProtocolVariant) -> Self {
        Self {
            backend,
            variant,
            progress: Mutex::new(Progress {
                state: SessionState::Uninitialized,
                setup: None,
            }),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn state(&self) -> SessionState {
        self.progress
            .lock()
            .map(|p| p.state)
            .unwrap_or(SessionState::Uninitialized)
    }

    /// Result of the last self-test, if one ran in this session.
    pub fn setup_state(&self) -> Option<SetupState> {
        self.progress.lock().ok().and_then(|p| p.setup)
    }

    // -----------------------------------------------------------------------
    // Administrative protocol
    // -----------------------------------------------------------------------

    pub async fn init(&self) -> Result<(), TseError> {
        self.backend.init().await.map_err(failed)?;
        self.transition(Operation::Init, &[], SessionState::Initialized);
        Ok(())
    }

    /// Returns `true` when one-time setup is still required.
    pub async fn self_test(&self, client_id: Option<&str>) -> Result<bool, TseError> {
        let op = Operation::SelfTest;
        let client_id = validation::validate_client_id(op, client_id)?;
        let setup_required = self.backend.self_test(&client_id).await.map_err(failed)?;

        let setup = SetupState::from_self_test(setup_required);
        let next = match setup {
            SetupState::SetupRequired => SessionState::SetupRequired,
            SetupState::Ready => SessionState::Ready,
        };
        if let Ok(mut p) = self.progress.lock() {
            p.setup = Some(setup);
        }
        self.transition(
            op,
            &[
                SessionState::Initialized,
                SessionState::SetupRequired,
                SessionState::Ready,
            ],
            next,
        );
        Ok(setup_required)
    }

    pub async fn setup(&self, request: &SetupRequest) -> Result<(), TseError> {
        let command = validation::validate_setup(request)?;
        self.backend.setup(&command).await.map_err(failed)?;
        if let Ok(mut p) = self.progress.lock() {
            p.setup = Some(SetupState::Ready);
        }
        self.transition(
            Operation::Setup,
            &[SessionState::SetupRequired],
            SessionState::Ready,
        );
        Ok(())
    }

    pub async fn login_admin_user(&self, admin_pin: Option<&str>) -> Result<(), TseError> {
        let pin = validation::validate_admin_pin(admin_pin)?;
        self.backend.login_admin_user(&pin).await.map_err(failed)?;
        self.transition(
            Operation::LoginAdminUser,
            &[SessionState::Ready],
            SessionState::Authenticated,
        );
        Ok(())
    }

    pub async fn update_time(&self) -> Result<(), TseError> {
        self.backend.update_time().await.map_err(failed)?;
        self.transition(
            Operation::UpdateTime,
            &[SessionState::Authenticated, SessionState::Operational],
            SessionState::Operational,
        );
        Ok(())
    }

    /// Wipes the device. The session returns to UNINITIALIZED.
    pub async fn factory_reset(&self) -> Result<(), TseError> {
        self.backend.factory_reset().await.map_err(failed)?;
        if let Ok(mut p) = self.progress.lock() {
            p.setup = None;
        }
        self.transition(Operation::FactoryReset, &[], SessionState::Uninitialized);
        Ok(())
    }

    /// init -> selfTest -> setup (only if required) -> loginAdminUser -> updateTime.
    ///
    /// Aborts on the first failure without rollback; a failed administrative
    /// setup needs manual intervention.
    pub async fn fast_init(&self, request: &FastInitRequest) -> Result<(), TseError> {
        info!(
            backend = self.backend.name(),
            client_id = request.client_id.as_deref().unwrap_or(""),
            "TSE fast init"
        );
        self.init().await?;
        let setup_required = self.self_test(request.client_id.as_deref()).await?;
        if setup_required {
            self.setup(request).await?;
        }
        self.login_admin_user(request.admin_pin.as_deref()).await?;
        self.update_time().await?;
        info!("TSE operational");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transaction sub-protocol
    // -----------------------------------------------------------------------

    /// Opens a transaction. The backend allocates the number.
    pub async fn start_transaction(
        &self,
        request: &StartTransactionRequest,
    ) -> Result<TransactionStart, TseError> {
        let command =
            validation::validate_start(Operation::StartTransaction, request, self.variant)?;
        let start = self
            .backend
            .start_transaction(&command)
            .await
            .map_err(failed)?;
        debug!(
            client_id = %command.client_id,
            number = start.transaction_number(),
            "transaction opened"
        );
        Ok(start)
    }

    pub async fn update_transaction(
        &self,
        request: &UpdateTransactionRequest,
    ) -> Result<LogRecord, TseError> {
        let command =
            validation::validate_transaction(Operation::UpdateTransaction, request, self.variant)?;
        self.backend
            .update_transaction(&command)
            .await
            .map_err(failed)
    }

    pub async fn finish_transaction(
        &self,
        request: &FinishTransactionRequest,
    ) -> Result<LogRecord, TseError> {
        let command =
            validation::validate_transaction(Operation::FinishTransaction, request, self.variant)?;
        let record = self
            .backend
            .finish_transaction(&command)
            .await
            .map_err(failed)?;
        debug!(
            client_id = %command.client_id,
            number = command.transaction_number,
            "transaction closed"
        );
        Ok(record)
    }

    /// Opens and closes a short-lived transaction in one backend call.
    pub async fn start_and_finish_transaction(
        &self,
        request: &StartTransactionRequest,
    ) -> Result<StartAndFinish, TseError> {
        let command = validation::validate_start(
            Operation::StartAndFinishTransaction,
            request,
            self.variant,
        )?;
        self.backend
            .start_and_finish_transaction(&command)
            .await
            .map_err(failed)
    }

    // -----------------------------------------------------------------------
    // Device identity
    // -----------------------------------------------------------------------

    pub async fn public_key(&self) -> Result<String, TseError> {
        self.backend.public_key().await.map_err(failed)
    }

    pub async fn serial_number(&self) -> Result<String, TseError> {
        self.backend.serial_number().await.map_err(failed)
    }

    pub async fn signature_algorithm(&self) -> Result<String, TseError> {
        self.backend.signature_algorithm().await.map_err(failed)
    }

    pub async fn certificate_expiry(&self) -> Result<DateTime<Utc>, TseError> {
        self.backend.certificate_expiry().await.map_err(failed)
    }

    pub async fn log_message_certificate(&self) -> Result<String, TseError> {
        self.backend.log_message_certificate().await.map_err(failed)
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    /// Move to `to` if the current state is in `from` (empty `from` = any).
    fn transition(&self, operation: Operation, from: &[SessionState], to: SessionState) {
        let Ok(mut p) = self.progress.lock() else {
            return;
        };
        if from.is_empty() || from.contains(&p.state) {
            if p.state != to {
                info!(%operation, from = ?p.state, to = ?to, "TSE session state changed");
            }
            p.state = to;
        } else {
            warn!(
                %operation,
                state = ?p.state,
                "administrative call out of order; state unchanged"
            );
        }
    }
}

/// Log a backend failure and hand it back unchanged.
fn failed(err: TseError) -> TseError {
    if err.is_backend() {
        warn!(error = %err, "TSE backend call failed");
    }
    err
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

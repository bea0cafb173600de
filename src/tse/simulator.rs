//! In-memory TSE simulator.
//!
//! Implements the same `TseBackend` contract as the device gateway but
//! synthesizes results locally: every record carries a fresh UUID log message
//! and a placeholder signature instead of a cryptographically valid one. Used
//! for integration testing without hardware.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::TseError;
use super::protocol::*;

pub const SIMULATED_SIGNATURE_ALGORITHM: &str = "ecdsa-plain-SHA384";

/// Default certificate expiry reported by the simulator (epoch seconds).
pub const DEFAULT_CERTIFICATE_EXPIRY_SECS: i64 = 1_600_559_999;

/// Upper bound of the random signature counter starting point.
const SIGNATURE_COUNTER_SEED_MAX: u64 = 100_000;
/// Upper bound of the random padding added to `processDataLength`.
const PROCESS_DATA_PADDING_MAX: u64 = 100;
const SIGNATURE_BYTES: usize = 96;

/// How the simulator treats update/finish calls for numbers it never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTransactionPolicy {
    /// Any number yields a valid record (the device is not consulted).
    #[default]
    Accept,
    /// Only currently open numbers are accepted; finishing closes a number.
    Reject,
}

impl UnknownTransactionPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "accept" => Some(UnknownTransactionPolicy::Accept),
            "reject" => Some(UnknownTransactionPolicy::Reject),
            _ => None,
        }
    }
}

/// Simulated TSE backend.
pub struct Simulator {
    variant: ProtocolVariant,
    policy: UnknownTransactionPolicy,
    next_transaction: AtomicU64,
    signature_counter: AtomicU64,
    open_transactions: Mutex<HashSet<TransactionNumber>>,
    serial_number: String,
    public_key: String,
    certificate_expiry: DateTime<Utc>,
}

impl Simulator {
    pub fn new(variant: ProtocolVariant, policy: UnknownTransactionPolicy) -> Self {
        let mut rng = rand::thread_rng();
        let serial_number = random_hex(&mut rng, 32);

        // Uncompressed EC point: 0x04 prefix + two 48-byte coordinates.
        let mut point = vec![0x04u8];
        point.extend((0..96).map(|_| rng.gen::<u8>()));
        let public_key = BASE64_STANDARD.encode(&point);

        let certificate_expiry = DateTime::from_timestamp(DEFAULT_CERTIFICATE_EXPIRY_SECS, 0)
            .unwrap_or_default();

        Self {
            variant,
            policy,
            next_transaction: AtomicU64::new(0),
            signature_counter: AtomicU64::new(rng.gen_range(0..SIGNATURE_COUNTER_SEED_MAX)),
            open_transactions: Mutex::new(HashSet::new()),
            serial_number,
            public_key,
            certificate_expiry,
        }
    }

    pub fn with_certificate_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.certificate_expiry = expiry;
        self
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn policy(&self) -> UnknownTransactionPolicy {
        self.policy
    }

    /// Next number `startTransaction` will hand out.
    pub fn peek_next_transaction_number(&self) -> TransactionNumber {
        self.next_transaction.load(Ordering::SeqCst)
    }

    fn allocate(&self) -> TransactionNumber {
        self.next_transaction.fetch_add(1, Ordering::SeqCst)
    }

    fn open_set(
        &self,
        operation: Operation,
    ) -> Result<MutexGuard<'_, HashSet<TransactionNumber>>, TseError> {
        self.open_transactions
            .lock()
            .map_err(|e| TseError::backend(operation, format!("simulator state poisoned: {e}")))
    }

    fn mark_open(&self, number: TransactionNumber) -> Result<(), TseError> {
        if self.policy == UnknownTransactionPolicy::Reject {
            self.open_set(Operation::StartTransaction)?.insert(number);
        }
        Ok(())
    }

    /// Enforces the unknown-transaction policy. `close` removes the number.
    fn check_open(
        &self,
        operation: Operation,
        number: TransactionNumber,
        close: bool,
    ) -> Result<(), TseError> {
        if self.policy == UnknownTransactionPolicy::Accept {
            return Ok(());
        }
        let mut open = self.open_set(operation)?;
        let known = if close {
            open.remove(&number)
        } else {
            open.contains(&number)
        };
        if known {
            Ok(())
        } else {
            Err(TseError::backend(
                operation,
                format!("transaction {number} is not open"),
            ))
        }
    }

    /// Synthesize a record for one transactional operation.
    fn sign(&self, transaction_number: TransactionNumber) -> LogRecord {
        let mut rng = rand::thread_rng();
        let log_message = Uuid::new_v4().to_string();
        let length = log_message.len() as u64;

        LogRecord {
            log_time: Utc::now().timestamp_millis(),
            serial_number: self.serial_number.clone(),
            signature: random_hex(&mut rng, SIGNATURE_BYTES),
            signature_counter: self.signature_counter.fetch_add(1, Ordering::SeqCst),
            transaction_number,
            log_message_length: length,
            process_data_length: length + rng.gen_range(0..=PROCESS_DATA_PADDING_MAX),
            log_message,
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(ProtocolVariant::default(), UnknownTransactionPolicy::default())
    }
}

#[async_trait]
impl TseBackend for Simulator {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn self_test(&self, client_id: &ClientId) -> Result<bool, TseError> {
        debug!(%client_id, "simulated self-test: setup required");
        Ok(true)
    }

    async fn init(&self) -> Result<(), TseError> {
        Ok(())
    }

    async fn setup(&self, command: &SetupCommand) -> Result<(), TseError> {
        info!(client_id = %command.client_id, "simulated TSE setup");
        Ok(())
    }

    async fn login_admin_user(&self, _admin_pin: &AdminPin) -> Result<(), TseError> {
        Ok(())
    }

    async fn update_time(&self) -> Result<(), TseError> {
        Ok(())
    }

    async fn factory_reset(&self) -> Result<(), TseError> {
        info!("simulated factory reset");
        Ok(())
    }

    async fn start_transaction(
        &self,
        command: &StartTransaction,
    ) -> Result<TransactionStart, TseError> {
        let number = self.allocate();
        self.mark_open(number)?;
        debug!(client_id = %command.client_id, number, "simulated transaction start");

        Ok(match self.variant {
            ProtocolVariant::NumberedStart => TransactionStart::Number(number),
            ProtocolVariant::SignedStart => TransactionStart::Signed(self.sign(number)),
        })
    }

    async fn update_transaction(
        &self,
        command: &TransactionCommand,
    ) -> Result<LogRecord, TseError> {
        self.check_open(
            Operation::UpdateTransaction,
            command.transaction_number,
            false,
        )?;
        Ok(self.sign(command.transaction_number))
    }

    async fn finish_transaction(
        &self,
        command: &TransactionCommand,
    ) -> Result<LogRecord, TseError> {
        self.check_open(
            Operation::FinishTransaction,
            command.transaction_number,
            true,
        )?;
        debug!(
            client_id = %command.client_id,
            number = command.transaction_number,
            "simulated transaction finish"
        );
        Ok(self.sign(command.transaction_number))
    }

    /// Draws from the same counter as `start_transaction`, so a fused call
    /// between two starts leaves a gap in their numbers.
    async fn start_and_finish_transaction(
        &self,
        command: &StartTransaction,
    ) -> Result<StartAndFinish, TseError> {
        let number = self.allocate();
        debug!(client_id = %command.client_id, number, "simulated start-and-finish");
        let transaction_start_info = self.sign(number);
        let transaction_finish_info = self.sign(number);
        Ok(StartAndFinish {
            transaction_start_info,
            transaction_finish_info,
        })
    }

    async fn public_key(&self) -> Result<String, TseError> {
        Ok(self.public_key.clone())
    }

    async fn serial_number(&self) -> Result<String, TseError> {
        Ok(self.serial_number.clone())
    }

    async fn signature_algorithm(&self) -> Result<String, TseError> {
        Ok(SIMULATED_SIGNATURE_ALGORITHM.to_string())
    }

    async fn certificate_expiry(&self) -> Result<DateTime<Utc>, TseError> {
        Ok(self.certificate_expiry)
    }

    async fn log_message_certificate(&self) -> Result<String, TseError> {
        Ok(placeholder_certificate(&self.serial_number, &self.public_key))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn random_hex(rng: &mut impl Rng, bytes: usize) -> String {
    (0..bytes).map(|_| format!("{:02X}", rng.gen::<u8>())).collect()
}

/// PEM-framed stand-in for the device certificate chain. Not parseable DER.
fn placeholder_certificate(serial_number: &str, public_key: &str) -> String {
    let body = BASE64_STANDARD.encode(format!(
        "simulated TSE {serial_number} {SIMULATED_SIGNATURE_ALGORITHM} {public_key}"
    ));
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

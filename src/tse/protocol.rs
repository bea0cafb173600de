//! TSE protocol types and the backend trait.
//!
//! Defines the `TseBackend` trait implemented by both the device gateway and
//! the simulator, along with the request records accepted at the client
//! boundary and the validated commands handed to a backend.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use super::error::TseError;

/// Backend-issued transaction number. `0` is a valid number.
pub type TransactionNumber = u64;

/// Open business payload attached to a transaction (line items, totals, ...).
pub type TransactionData = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Every remote operation the TSE exposes. Used as the call label for the
/// transport and in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    SelfTest,
    Init,
    Setup,
    LoginAdminUser,
    UpdateTime,
    FactoryReset,
    StartTransaction,
    UpdateTransaction,
    FinishTransaction,
    StartAndFinishTransaction,
    GetTsePublicKey,
    GetTseSerialNumber,
    GetTseSignatureAlgorithm,
    GetTseCertificateExpDate,
    GetLogMessageCertificate,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::SelfTest => "selfTest",
            Operation::Init => "init",
            Operation::Setup => "setup",
            Operation::LoginAdminUser => "loginAdminUser",
            Operation::UpdateTime => "updateTime",
            Operation::FactoryReset => "factoryReset",
            Operation::StartTransaction => "startTransaction",
            Operation::UpdateTransaction => "updateTransaction",
            Operation::FinishTransaction => "finishTransaction",
            Operation::StartAndFinishTransaction => "startAndFinishTransaction",
            Operation::GetTsePublicKey => "getTsePublicKey",
            Operation::GetTseSerialNumber => "getTseSerialNumber",
            Operation::GetTseSignatureAlgorithm => "getTseSignatureAlgorithm",
            Operation::GetTseCertificateExpDate => "getTseCertificateExpDate",
            Operation::GetLogMessageCertificate => "getLogMessageCertificate",
        }
    }

    /// Path of the device REST endpoint (without leading slash).
    pub fn path(self) -> &'static str {
        match self {
            Operation::SelfTest => "tse-self-test",
            Operation::Init => "tse-init",
            Operation::Setup => "tse-setup",
            Operation::LoginAdminUser => "tse-admin-user-login",
            Operation::UpdateTime => "tse-update-time",
            Operation::FactoryReset => "tse-factory-reset",
            Operation::StartTransaction => "start-tse-transaction",
            Operation::UpdateTransaction => "update-tse-transaction",
            Operation::FinishTransaction => "finish-tse-transaction",
            Operation::StartAndFinishTransaction => "start-and-finish-tse-transaction",
            Operation::GetTsePublicKey => "tse-public-key",
            Operation::GetTseSerialNumber => "tse-serial-number",
            Operation::GetTseSignatureAlgorithm => "tse-signature-algorithm",
            Operation::GetTseCertificateExpDate => "tse-certificate-exp-date",
            Operation::GetLogMessageCertificate => "tse-log-message-certificate",
        }
    }

    /// Read-only status queries (fetched with GET, no side effects).
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Operation::GetTsePublicKey
                | Operation::GetTseSerialNumber
                | Operation::GetTseSignatureAlgorithm
                | Operation::GetTseCertificateExpDate
                | Operation::GetLogMessageCertificate
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Protocol variants
// ---------------------------------------------------------------------------

/// Transaction protocol version spoken by the target device.
///
/// The two variants differ in which optional fields are mandatory and in the
/// shape of the `startTransaction` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// Start returns only the transaction number; start/update carry data.
    #[default]
    NumberedStart,
    /// Start returns a full signed record; every call carries a process type.
    SignedStart,
}

impl ProtocolVariant {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "numbered_start" | "numberedStart" | "numbered" => Some(ProtocolVariant::NumberedStart),
            "signed_start" | "signedStart" | "signed" => Some(ProtocolVariant::SignedStart),
            _ => None,
        }
    }

    pub fn requires_transaction_data(self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (
                ProtocolVariant::NumberedStart,
                Operation::StartTransaction | Operation::UpdateTransaction
            )
        )
    }

    pub fn requires_process_type(self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (
                ProtocolVariant::SignedStart,
                Operation::StartTransaction
                    | Operation::UpdateTransaction
                    | Operation::FinishTransaction
            )
        )
    }
}

// ---------------------------------------------------------------------------
// Identity and secrets
// ---------------------------------------------------------------------------

/// Non-empty identifier of a register / point of sale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub(crate) fn new_unchecked(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification tag threaded through transaction calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProcessType(String);

impl ProcessType {
    pub(crate) fn new_unchecked(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Admin PIN, cleared from memory on drop.
#[derive(Clone)]
pub struct AdminPin(Zeroizing<String>);

impl AdminPin {
    pub(crate) fn new_unchecked(raw: String) -> Self {
        Self(Zeroizing::new(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AdminPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminPin(***)")
    }
}

/// One-time setup secrets. Forwarded to the device, never persisted.
#[derive(Clone)]
pub struct Credentials {
    credential_seed: Zeroizing<String>,
    admin_puk: Zeroizing<String>,
    admin_pin: Zeroizing<String>,
    time_admin_pin: Zeroizing<String>,
}

impl Credentials {
    pub(crate) fn new_unchecked(
        credential_seed: String,
        admin_puk: String,
        admin_pin: String,
        time_admin_pin: String,
    ) -> Self {
        Self {
            credential_seed: Zeroizing::new(credential_seed),
            admin_puk: Zeroizing::new(admin_puk),
            admin_pin: Zeroizing::new(admin_pin),
            time_admin_pin: Zeroizing::new(time_admin_pin),
        }
    }

    pub fn credential_seed(&self) -> &str {
        &self.credential_seed
    }

    pub fn admin_puk(&self) -> &str {
        &self.admin_puk
    }

    pub fn admin_pin(&self) -> &str {
        &self.admin_pin
    }

    pub fn time_admin_pin(&self) -> &str {
        &self.time_admin_pin
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Boundary requests (fields may be absent)
// ---------------------------------------------------------------------------

/// Setup / fast-init input as received from the caller.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupRequest {
    pub credential_seed: Option<String>,
    pub admin_puk: Option<String>,
    pub admin_pin: Option<String>,
    pub time_admin_pin: Option<String>,
    pub client_id: Option<String>,
}

impl fmt::Debug for SetupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupRequest")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// `fastInit` takes the same fields as `setup`.
pub type FastInitRequest = SetupRequest;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartTransactionRequest {
    pub client_id: Option<String>,
    pub transaction_data: Option<Value>,
    pub process_type: Option<String>,
}

impl StartTransactionRequest {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.transaction_data = Some(data);
        self
    }

    pub fn with_process_type(mut self, process_type: impl Into<String>) -> Self {
        self.process_type = Some(process_type.into());
        self
    }
}

/// Shared shape of update and finish requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionRequest {
    pub client_id: Option<String>,
    #[serde(deserialize_with = "optional_number_or_string")]
    pub transaction_number: Option<TransactionNumber>,
    pub transaction_data: Option<Value>,
    pub process_type: Option<String>,
}

impl TransactionRequest {
    pub fn new(client_id: impl Into<String>, transaction_number: TransactionNumber) -> Self {
        Self {
            client_id: Some(client_id.into()),
            transaction_number: Some(transaction_number),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.transaction_data = Some(data);
        self
    }

    pub fn with_process_type(mut self, process_type: impl Into<String>) -> Self {
        self.process_type = Some(process_type.into());
        self
    }
}

pub type UpdateTransactionRequest = TransactionRequest;
pub type FinishTransactionRequest = TransactionRequest;

// ---------------------------------------------------------------------------
// Validated commands (what a backend receives)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SetupCommand {
    pub client_id: ClientId,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartTransaction {
    pub client_id: ClientId,
    pub transaction_data: Option<TransactionData>,
    pub process_type: Option<ProcessType>,
}

/// Validated update or finish command against an open transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionCommand {
    pub client_id: ClientId,
    pub transaction_number: TransactionNumber,
    pub transaction_data: Option<TransactionData>,
    pub process_type: Option<ProcessType>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Signed result of one transactional operation. Produced only by a backend.
///
/// `log_time` is passed through as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub log_time: i64,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub signature: String,
    #[serde(deserialize_with = "number_or_string")]
    pub signature_counter: u64,
    #[serde(deserialize_with = "number_or_string")]
    pub transaction_number: TransactionNumber,
    pub log_message: String,
    pub log_message_length: u64,
    pub process_data_length: u64,
}

/// Result of `startTransaction`; the shape depends on the protocol variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TransactionStart {
    Number(TransactionNumber),
    Signed(LogRecord),
}

impl TransactionStart {
    pub fn transaction_number(&self) -> TransactionNumber {
        match self {
            TransactionStart::Number(n) => *n,
            TransactionStart::Signed(record) => record.transaction_number,
        }
    }

    pub fn log_record(&self) -> Option<&LogRecord> {
        match self {
            TransactionStart::Number(_) => None,
            TransactionStart::Signed(record) => Some(record),
        }
    }
}

/// Records returned by the fused start-and-finish call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAndFinish {
    pub transaction_start_info: LogRecord,
    pub transaction_finish_info: LogRecord,
}

/// Outcome of the last self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupState {
    SetupRequired,
    Ready,
}

impl SetupState {
    pub fn from_self_test(setup_required: bool) -> Self {
        if setup_required {
            SetupState::SetupRequired
        } else {
            SetupState::Ready
        }
    }
}

/// Accepts a transaction number reported either as a JSON number or as a
/// numeric string.
pub fn parse_transaction_number(value: &Value) -> Option<TransactionNumber> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_transaction_number(&value)
        .ok_or_else(|| de::Error::custom(format!("expected unsigned number, got {value}")))
}

/// Like `number_or_string`, but absent or `null` means "not supplied" so the
/// validation layer can report the missing field.
fn optional_number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_transaction_number(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected unsigned number, got {value}"))),
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Capability set shared by the real device gateway and the simulator.
///
/// Backends receive only validated commands; required-field checks happen in
/// [`crate::tse::validation`] before a backend is ever called.
#[async_trait]
pub trait TseBackend: Send + Sync {
    /// Backend name (for logging).
    fn name(&self) -> &str;

    /// Returns `true` when one-time setup is still required.
    async fn self_test(&self, client_id: &ClientId) -> Result<bool, TseError>;

    async fn init(&self) -> Result<(), TseError>;

    async fn setup(&self, command: &SetupCommand) -> Result<(), TseError>;

    async fn login_admin_user(&self, admin_pin: &AdminPin) -> Result<(), TseError>;

    async fn update_time(&self) -> Result<(), TseError>;

    async fn factory_reset(&self) -> Result<(), TseError>;

    async fn start_transaction(
        &self,
        command: &StartTransaction,
    ) -> Result<TransactionStart, TseError>;

    async fn update_transaction(&self, command: &TransactionCommand)
        -> Result<LogRecord, TseError>;

    async fn finish_transaction(&self, command: &TransactionCommand)
        -> Result<LogRecord, TseError>;

    async fn start_and_finish_transaction(
        &self,
        command: &StartTransaction,
    ) -> Result<StartAndFinish, TseError>;

    async fn public_key(&self) -> Result<String, TseError>;

    async fn serial_number(&self) -> Result<String, TseError>;

    async fn signature_algorithm(&self) -> Result<String, TseError>;

    async fn certificate_expiry(&self) -> Result<DateTime<Utc>, TseError>;

    /// PEM-encoded certificate chain used to verify log messages.
    async fn log_message_certificate(&self) -> Result<String, TseError>;
}

//! Device gateway: the real TSE backend.
//!
//! Maps every operation 1:1 onto one transport call and normalises the
//! device's JSON responses into protocol types. Failures are surfaced with the
//! device's diagnostic content intact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::error::TseError;
use super::protocol::*;
use super::transport::DeviceTransport;

/// TSE backend that forwards to a physical device through a transport.
pub struct DeviceGateway<T: DeviceTransport> {
    transport: T,
    variant: ProtocolVariant,
}

impl<T: DeviceTransport> DeviceGateway<T> {
    pub fn new(transport: T, variant: ProtocolVariant) -> Self {
        Self { transport, variant }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn command(&self, operation: Operation, body: Option<Value>) -> Result<Value, TseError> {
        debug!(%operation, device = %self.transport.description(), "forwarding to device");
        self.transport.call(operation, body).await
    }

    async fn query_text(&self, operation: Operation) -> Result<String, TseError> {
        let value = self.command(operation, None).await?;
        text_value(operation, value)
    }
}

#[async_trait]
impl<T: DeviceTransport> TseBackend for DeviceGateway<T> {
    fn name(&self) -> &str {
        "device"
    }

    async fn self_test(&self, client_id: &ClientId) -> Result<bool, TseError> {
        let op = Operation::SelfTest;
        let value = self
            .command(op, Some(json!({ "clientId": client_id })))
            .await?;
        value
            .get("setupRequired")
            .and_then(Value::as_bool)
            .ok_or_else(|| malformed(op, "setupRequired", &value))
    }

    async fn init(&self) -> Result<(), TseError> {
        self.command(Operation::Init, None).await.map(|_| ())
    }

    async fn setup(&self, command: &SetupCommand) -> Result<(), TseError> {
        let creds = &command.credentials;
        let body = json!({
            "credentialSeed": creds.credential_seed(),
            "adminPuk": creds.admin_puk(),
            "adminPin": creds.admin_pin(),
            "timeAdminPin": creds.time_admin_pin(),
            "clientId": command.client_id,
        });
        self.command(Operation::Setup, Some(body)).await.map(|_| ())
    }

    async fn login_admin_user(&self, admin_pin: &AdminPin) -> Result<(), TseError> {
        let body = json!({ "adminPin": admin_pin.as_str() });
        self.command(Operation::LoginAdminUser, Some(body))
            .await
            .map(|_| ())
    }

    async fn update_time(&self) -> Result<(), TseError> {
        self.command(Operation::UpdateTime, None).await.map(|_| ())
    }

    async fn factory_reset(&self) -> Result<(), TseError> {
        self.command(Operation::FactoryReset, None).await.map(|_| ())
    }

    async fn start_transaction(
        &self,
        command: &StartTransaction,
    ) -> Result<TransactionStart, TseError> {
        let op = Operation::StartTransaction;
        let body = transaction_body(
            &command.client_id,
            None,
            command.transaction_data.as_ref(),
            command.process_type.as_ref(),
        );
        let value = self.command(op, Some(body)).await?;
        parse_start(op, self.variant, value)
    }

    async fn update_transaction(
        &self,
        command: &TransactionCommand,
    ) -> Result<LogRecord, TseError> {
        self.transaction_call(Operation::UpdateTransaction, command)
            .await
    }

    async fn finish_transaction(
        &self,
        command: &TransactionCommand,
    ) -> Result<LogRecord, TseError> {
        self.transaction_call(Operation::FinishTransaction, command)
            .await
    }

    async fn start_and_finish_transaction(
        &self,
        command: &StartTransaction,
    ) -> Result<StartAndFinish, TseError> {
        let op = Operation::StartAndFinishTransaction;
        let body = transaction_body(
            &command.client_id,
            None,
            command.transaction_data.as_ref(),
            command.process_type.as_ref(),
        );
        let value = self.command(op, Some(body)).await?;
        decode(op, value)
    }

    async fn public_key(&self) -> Result<String, TseError> {
        self.query_text(Operation::GetTsePublicKey).await
    }

    async fn serial_number(&self) -> Result<String, TseError> {
        self.query_text(Operation::GetTseSerialNumber).await
    }

    async fn signature_algorithm(&self) -> Result<String, TseError> {
        self.query_text(Operation::GetTseSignatureAlgorithm).await
    }

    async fn certificate_expiry(&self) -> Result<DateTime<Utc>, TseError> {
        let op = Operation::GetTseCertificateExpDate;
        let raw = self.query_text(op).await?;
        certificate_expiry_from_epoch(&raw).ok_or_else(|| {
            TseError::backend(op, format!("invalid certificate expiry '{raw}'"))
        })
    }

    async fn log_message_certificate(&self) -> Result<String, TseError> {
        self.query_text(Operation::GetLogMessageCertificate).await
    }
}

impl<T: DeviceTransport> DeviceGateway<T> {
    async fn transaction_call(
        &self,
        operation: Operation,
        command: &TransactionCommand,
    ) -> Result<LogRecord, TseError> {
        let body = transaction_body(
            &command.client_id,
            Some(command.transaction_number),
            command.transaction_data.as_ref(),
            command.process_type.as_ref(),
        );
        let value = self.command(operation, Some(body)).await?;
        decode(operation, value)
    }
}

// ---------------------------------------------------------------------------
// Request / response helpers
// ---------------------------------------------------------------------------

/// Build a transaction request body. The firmware expects the optional keys
/// to be present, so absent values are sent as empty strings.
fn transaction_body(
    client_id: &ClientId,
    transaction_number: Option<TransactionNumber>,
    data: Option<&TransactionData>,
    process_type: Option<&ProcessType>,
) -> Value {
    let mut body = Map::new();
    body.insert("clientId".into(), json!(client_id));
    if let Some(n) = transaction_number {
        body.insert("transactionNumber".into(), json!(n));
    }
    body.insert(
        "transactionData".into(),
        data.map(|d| Value::Object(d.clone()))
            .unwrap_or_else(|| json!("")),
    );
    body.insert(
        "processType".into(),
        json!(process_type.map(ProcessType::as_str).unwrap_or("")),
    );
    Value::Object(body)
}

fn parse_start(
    operation: Operation,
    variant: ProtocolVariant,
    value: Value,
) -> Result<TransactionStart, TseError> {
    match variant {
        ProtocolVariant::NumberedStart => {
            let number = match &value {
                Value::Object(map) => map.get("transactionNumber").and_then(parse_transaction_number),
                other => parse_transaction_number(other),
            };
            number
                .map(TransactionStart::Number)
                .ok_or_else(|| malformed(operation, "transactionNumber", &value))
        }
        ProtocolVariant::SignedStart => decode(operation, value).map(TransactionStart::Signed),
    }
}

fn decode<R: DeserializeOwned>(operation: Operation, value: Value) -> Result<R, TseError> {
    let raw = value.to_string();
    serde_json::from_value(value).map_err(|e| {
        TseError::backend(operation, format!("unexpected response ({e}): {raw}"))
    })
}

fn text_value(operation: Operation, value: Value) -> Result<String, TseError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(TseError::backend(
            operation,
            format!("expected text response, got {other}"),
        )),
    }
}

fn malformed(operation: Operation, field: &str, value: &Value) -> TseError {
    TseError::backend(
        operation,
        format!("response is missing '{field}': {value}"),
    )
}

/// Convert a device-reported expiry (epoch seconds, as a numeric string) into
/// an absolute timestamp with millisecond precision.
pub fn certificate_expiry_from_epoch(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let millis = match raw.parse::<i64>() {
        Ok(secs) => secs.checked_mul(1000)?,
        Err(_) => {
            let secs = raw.parse::<f64>().ok().filter(|s| s.is_finite())?;
            (secs * 1000.0).round() as i64
        }
    };
    DateTime::from_timestamp_millis(millis)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tse::validation;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: records every call and replays queued responses.
    #[derive(Default)]
    struct ScriptedTransport {
        calls: Mutex<Vec<(Operation, Option<Value>)>>,
        responses: Mutex<VecDeque<Result<Value, TseError>>>,
    }

    impl ScriptedTransport {
        fn replying(responses: Vec<Result<Value, TseError>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
            }
        }

        fn calls(&self) -> Vec<(Operation, Option<Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceTransport for ScriptedTransport {
        async fn call(&self, operation: Operation, body: Option<Value>) -> Result<Value, TseError> {
            self.calls.lock().unwrap().push((operation, body));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Null))
        }

        fn description(&self) -> String {
            "scripted".into()
        }
    }

    fn gateway(responses: Vec<Result<Value, TseError>>) -> DeviceGateway<ScriptedTransport> {
        DeviceGateway::new(
            ScriptedTransport::replying(responses),
            ProtocolVariant::NumberedStart,
        )
    }

    fn client(id: &str) -> ClientId {
        validation::validate_client_id(Operation::SelfTest, Some(id)).unwrap()
    }

    fn record_json(n: u64, msg: &str) -> Value {
        json!({
            "logTime": 1598511197000i64,
            "signatureCounter": 918,
            "transactionNumber": n,
            "logMessageLength": msg.len(),
            "processDataLength": msg.len() + 12,
            "logMessage": msg
        })
    }

    #[tokio::test]
    async fn test_self_test_reads_setup_required() {
        let gw = gateway(vec![Ok(json!({"setupRequired": false}))]);
        assert!(!gw.self_test(&client("SWISSBIT")).await.unwrap());

        let calls = gw.transport().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Operation::SelfTest);
        assert_eq!(calls[0].1, Some(json!({"clientId": "SWISSBIT"})));
    }

    #[tokio::test]
    async fn test_self_test_malformed_response() {
        let gw = gateway(vec![Ok(json!({"status": "ok"}))]);
        let err = gw.self_test(&client("A")).await.unwrap_err();
        assert!(err.is_backend());
    }

    #[tokio::test]
    async fn test_setup_forwards_all_credentials() {
        let gw = gateway(vec![]);
        let cmd = validation::validate_setup(&SetupRequest {
            credential_seed: Some("SwissbitSwissbit".into()),
            admin_puk: Some("123456".into()),
            admin_pin: Some("12345".into()),
            time_admin_pin: Some("54321".into()),
            client_id: Some("SWISSBIT".into()),
        })
        .unwrap();
        gw.setup(&cmd).await.unwrap();

        let calls = gw.transport().calls();
        assert_eq!(calls[0].0, Operation::Setup);
        assert_eq!(
            calls[0].1,
            Some(json!({
                "credentialSeed": "SwissbitSwissbit",
                "adminPuk": "123456",
                "adminPin": "12345",
                "timeAdminPin": "54321",
                "clientId": "SWISSBIT"
            }))
        );
    }

    #[tokio::test]
    async fn test_start_numbered_accepts_object_or_bare_number() {
        let gw = gateway(vec![Ok(json!({"transactionNumber": 4})), Ok(json!(5))]);
        let cmd = StartTransaction {
            client_id: client("A"),
            transaction_data: json!({"x": 1}).as_object().cloned(),
            process_type: None,
        };
        assert_eq!(
            gw.start_transaction(&cmd).await.unwrap(),
            TransactionStart::Number(4)
        );
        assert_eq!(
            gw.start_transaction(&cmd).await.unwrap(),
            TransactionStart::Number(5)
        );

        let body = gw.transport().calls()[0].1.clone().unwrap();
        assert_eq!(body["transactionData"], json!({"x": 1}));
        assert_eq!(body["processType"], json!(""));
        assert!(body.get("transactionNumber").is_none());
    }

    #[tokio::test]
    async fn test_start_signed_parses_log_record() {
        let gw = DeviceGateway::new(
            ScriptedTransport::replying(vec![Ok(record_json(26, "start"))]),
            ProtocolVariant::SignedStart,
        );
        let cmd = StartTransaction {
            client_id: client("A"),
            transaction_data: None,
            process_type: Some(ProcessType::new_unchecked("Kassenbeleg-V1".into())),
        };
        let start = gw.start_transaction(&cmd).await.unwrap();
        assert_eq!(start.transaction_number(), 26);
        assert_eq!(start.log_record().unwrap().log_message, "start");
    }

    #[tokio::test]
    async fn test_start_shape_mismatch_is_backend_error() {
        let gw = gateway(vec![Ok(json!({"ok": true}))]);
        let cmd = StartTransaction {
            client_id: client("A"),
            transaction_data: None,
            process_type: None,
        };
        let err = gw.start_transaction(&cmd).await.unwrap_err();
        assert!(err.is_backend());
    }

    #[tokio::test]
    async fn test_finish_sends_number_zero() {
        let gw = gateway(vec![Ok(record_json(0, "finish"))]);
        let cmd = TransactionCommand {
            client_id: client("A"),
            transaction_number: 0,
            transaction_data: None,
            process_type: None,
        };
        let record = gw.finish_transaction(&cmd).await.unwrap();
        assert_eq!(record.transaction_number, 0);

        let calls = gw.transport().calls();
        assert_eq!(calls[0].0, Operation::FinishTransaction);
        let body = calls[0].1.clone().unwrap();
        assert_eq!(body["transactionNumber"], json!(0));
        assert_eq!(body["transactionData"], json!(""));
    }

    #[tokio::test]
    async fn test_backend_error_passed_through_verbatim() {
        let gw = gateway(vec![Err(TseError::Backend {
            operation: Operation::UpdateTransaction,
            status: Some(400),
            detail: "Missing property in request".into(),
        })]);
        let cmd = TransactionCommand {
            client_id: client("A"),
            transaction_number: 3,
            transaction_data: None,
            process_type: None,
        };
        match gw.update_transaction(&cmd).await {
            Err(TseError::Backend { status, detail, .. }) => {
                assert_eq!(status, Some(400));
                assert_eq!(detail, "Missing property in request");
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_and_finish_decodes_both_records() {
        let gw = gateway(vec![Ok(json!({
            "transactionStartInfo": record_json(26, "a"),
            "transactionFinishInfo": record_json(26, "b")
        }))]);
        let cmd = StartTransaction {
            client_id: client("A"),
            transaction_data: None,
            process_type: None,
        };
        let both = gw.start_and_finish_transaction(&cmd).await.unwrap();
        assert_eq!(
            both.transaction_start_info.transaction_number,
            both.transaction_finish_info.transaction_number
        );
    }

    #[tokio::test]
    async fn test_queries_use_query_operations() {
        let gw = gateway(vec![
            Ok(json!("BHh1SuQKbT9k")),
            Ok(json!("2D49DCE4")),
            Ok(json!("ecdsa-plain-SHA384")),
            Ok(json!(1600559999)),
            Ok(json!("-----BEGIN CERTIFICATE-----\n")),
        ]);
        assert_eq!(gw.public_key().await.unwrap(), "BHh1SuQKbT9k");
        assert_eq!(gw.serial_number().await.unwrap(), "2D49DCE4");
        assert_eq!(gw.signature_algorithm().await.unwrap(), "ecdsa-plain-SHA384");
        assert_eq!(
            gw.certificate_expiry().await.unwrap().timestamp_millis(),
            1_600_559_999_000
        );
        assert!(gw
            .log_message_certificate()
            .await
            .unwrap()
            .starts_with("-----BEGIN CERTIFICATE-----"));

        assert!(gw.transport().calls().iter().all(|(op, body)| op.is_query() && body.is_none()));
    }

    #[test]
    fn test_certificate_expiry_from_epoch() {
        let ts = certificate_expiry_from_epoch("1600559999").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_600_559_999_000);
        let ts = certificate_expiry_from_epoch(" 1.5 ").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_500);
        assert!(certificate_expiry_from_epoch("soon").is_none());
        assert!(certificate_expiry_from_epoch("").is_none());
    }

    #[tokio::test]
    async fn test_invalid_expiry_is_backend_error() {
        let gw = gateway(vec![Ok(json!({"expiry": "never"}))]);
        assert!(gw.certificate_expiry().await.unwrap_err().is_backend());
    }
}

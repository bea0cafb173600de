//! Required-field validation shared by every backend.
//!
//! Each public operation has a fixed set of required fields. A missing, null,
//! or empty field fails here with `TseError::Validation` before any backend
//! call is issued. `transactionNumber` is checked for presence only: `0` is a
//! valid number.

use serde_json::Value;

use super::error::TseError;
use super::protocol::*;

pub fn validate_client_id(
    operation: Operation,
    client_id: Option<&str>,
) -> Result<ClientId, TseError> {
    require_str(operation, "clientId", client_id).map(ClientId::new_unchecked)
}

pub fn validate_setup(request: &SetupRequest) -> Result<SetupCommand, TseError> {
    let op = Operation::Setup;
    let credential_seed = require_str(op, "credentialSeed", request.credential_seed.as_deref())?;
    let admin_puk = require_str(op, "adminPuk", request.admin_puk.as_deref())?;
    let admin_pin = require_str(op, "adminPin", request.admin_pin.as_deref())?;
    let time_admin_pin = require_str(op, "timeAdminPin", request.time_admin_pin.as_deref())?;
    let client_id = validate_client_id(op, request.client_id.as_deref())?;

    Ok(SetupCommand {
        client_id,
        credentials: Credentials::new_unchecked(
            credential_seed,
            admin_puk,
            admin_pin,
            time_admin_pin,
        ),
    })
}

pub fn validate_admin_pin(admin_pin: Option<&str>) -> Result<AdminPin, TseError> {
    require_str(Operation::LoginAdminUser, "adminPin", admin_pin).map(AdminPin::new_unchecked)
}

/// Validates `startTransaction` and `startAndFinishTransaction` input.
pub fn validate_start(
    operation: Operation,
    request: &StartTransactionRequest,
    variant: ProtocolVariant,
) -> Result<StartTransaction, TseError> {
    let client_id = validate_client_id(operation, request.client_id.as_deref())?;
    let transaction_data = transaction_data(
        operation,
        request.transaction_data.as_ref(),
        variant.requires_transaction_data(operation),
    )?;
    let process_type = process_type(
        operation,
        request.process_type.as_deref(),
        variant.requires_process_type(operation),
    )?;

    Ok(StartTransaction {
        client_id,
        transaction_data,
        process_type,
    })
}

/// Validates `updateTransaction` and `finishTransaction` input.
pub fn validate_transaction(
    operation: Operation,
    request: &TransactionRequest,
    variant: ProtocolVariant,
) -> Result<TransactionCommand, TseError> {
    let client_id = validate_client_id(operation, request.client_id.as_deref())?;
    // Presence check, not truthiness: 0 is a valid transaction number.
    let transaction_number = request.transaction_number.ok_or(TseError::Validation {
        operation,
        field: "transactionNumber",
    })?;
    let transaction_data = transaction_data(
        operation,
        request.transaction_data.as_ref(),
        variant.requires_transaction_data(operation),
    )?;
    let process_type = process_type(
        operation,
        request.process_type.as_deref(),
        variant.requires_process_type(operation),
    )?;

    Ok(TransactionCommand {
        client_id,
        transaction_number,
        transaction_data,
        process_type,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn require_str(
    operation: Operation,
    field: &'static str,
    value: Option<&str>,
) -> Result<String, TseError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(TseError::Validation { operation, field }),
    }
}

fn process_type(
    operation: Operation,
    value: Option<&str>,
    required: bool,
) -> Result<Option<ProcessType>, TseError> {
    match value {
        Some(v) if !v.is_empty() => Ok(Some(ProcessType::new_unchecked(v.to_string()))),
        _ if required => Err(TseError::Validation {
            operation,
            field: "processType",
        }),
        _ => Ok(None),
    }
}

fn transaction_data(
    operation: Operation,
    value: Option<&Value>,
    required: bool,
) -> Result<Option<TransactionData>, TseError> {
    match value {
        None | Some(Value::Null) if required => Err(TseError::Validation {
            operation,
            field: "transactionData",
        }),
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(other) => Err(TseError::TypeMismatch {
            operation,
            field: "transactionData",
            found: json_kind(other),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

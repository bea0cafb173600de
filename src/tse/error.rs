//! Error taxonomy shared by every TSE backend.

use thiserror::Error;

use super::protocol::Operation;

/// Errors surfaced by the TSE client.
///
/// Validation failures are raised before any backend call is issued, so a
/// `Validation` or `TypeMismatch` error guarantees the device never saw the
/// request.
#[derive(Debug, Error)]
pub enum TseError {
    /// A required field was missing, null, or empty.
    #[error("{operation}: missing required field '{field}'")]
    Validation {
        operation: Operation,
        field: &'static str,
    },

    /// `transactionData` was supplied but is not a structured record.
    #[error("{operation}: '{field}' must be a structured record, got {found}")]
    TypeMismatch {
        operation: Operation,
        field: &'static str,
        found: &'static str,
    },

    /// The backend (device, network, or simulator) rejected the operation.
    /// `detail` is the backend's diagnostic content, unmodified.
    #[error("{operation} failed: {detail}")]
    Backend {
        operation: Operation,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        detail: String,
    },

    #[error("invalid TSE configuration: {0}")]
    Config(String),
}

impl TseError {
    pub(crate) fn backend(operation: Operation, detail: impl Into<String>) -> Self {
        TseError::Backend {
            operation,
            status: None,
            detail: detail.into(),
        }
    }

    /// True for errors raised at the client boundary (never reached the backend).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TseError::Validation { .. } | TseError::TypeMismatch { .. }
        )
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, TseError::Backend { .. })
    }

    /// The operation this error belongs to, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            TseError::Validation { operation, .. }
            | TseError::TypeMismatch { operation, .. }
            | TseError::Backend { operation, .. } => Some(*operation),
            TseError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_field() {
        let err = TseError::Validation {
            operation: Operation::UpdateTransaction,
            field: "transactionNumber",
        };
        assert_eq!(
            err.to_string(),
            "updateTransaction: missing required field 'transactionNumber'"
        );
        assert!(err.is_validation());
        assert!(!err.is_backend());
    }

    #[test]
    fn test_backend_detail_passed_through() {
        let err = TseError::Backend {
            operation: Operation::FinishTransaction,
            status: Some(400),
            detail: "Missing property in request".into(),
        };
        assert_eq!(
            err.to_string(),
            "finishTransaction failed: Missing property in request"
        );
        assert_eq!(err.operation(), Some(Operation::FinishTransaction));
    }

    #[test]
    fn test_config_error_has_no_operation() {
        let err = TseError::Config("deviceHost is required".into());
        assert!(err.operation().is_none());
        assert!(!err.is_validation());
    }
}

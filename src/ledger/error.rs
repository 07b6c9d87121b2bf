//! Ledger Error Types
//!
//! Every failed engine operation surfaces exactly one [`LedgerError`].
//! The outer shell maps it to a transport status via [`LedgerError::http_status`]
//! and shows [`LedgerError::public_message`], never the store's own text.

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::AccountId;

/// PostgreSQL SQLSTATE: serialization_failure
const PG_SERIALIZATION_FAILURE: &str = "40001";
/// PostgreSQL SQLSTATE: deadlock_detected
const PG_DEADLOCK_DETECTED: &str = "40P01";
/// PostgreSQL SQLSTATE: numeric_value_out_of_range
const PG_NUMERIC_OUT_OF_RANGE: &str = "22003";

/// Coarse error classification handed to the outer shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAmount,
    InvalidTransfer,
    NotFound,
    InsufficientFunds,
    /// Idempotency key reused with different parameters
    Conflict,
    /// Safe to retry the whole operation from scratch
    Transient,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "INVALID_AMOUNT",
            ErrorKind::InvalidTransfer => "INVALID_TRANSFER",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Amount must be positive with at most 2 decimal places")]
    InvalidAmount,

    #[error("Source and destination account cannot be the same")]
    InvalidTransfer,

    // === Account Errors ===
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    #[error("Insufficient funds on account {account}: requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        requested: Decimal,
    },

    // === Idempotency Errors ===
    #[error("Idempotency key reused with different parameters: {0}")]
    DuplicateRequest(String),

    // === System Errors ===
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount => ErrorKind::InvalidAmount,
            LedgerError::InvalidTransfer => ErrorKind::InvalidTransfer,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::DuplicateRequest(_) => ErrorKind::Conflict,
            LedgerError::Transient(_) => ErrorKind::Transient,
            LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidAmount | ErrorKind::InvalidTransfer => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InsufficientFunds => 422,
            ErrorKind::Transient => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Whether the caller may retry the whole operation.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Message safe to show to an end user (no store internals)
    pub fn public_message(&self) -> String {
        match self {
            LedgerError::Transient(_) => {
                "Ledger temporarily unavailable, please retry".to_string()
            }
            LedgerError::Internal(_) => "Internal ledger error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(PG_SERIALIZATION_FAILURE) | Some(PG_DEADLOCK_DETECTED) => {
                    LedgerError::Transient(e.to_string())
                }
                // balance would leave NUMERIC(15,2)
                Some(PG_NUMERIC_OUT_OF_RANGE) => LedgerError::InvalidAmount,
                _ => LedgerError::Internal(e.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                LedgerError::Transient(e.to_string())
            }
            _ => LedgerError::Internal(e.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for LedgerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        LedgerError::Transient("unit of work timed out".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::InvalidAmount.code(), "INVALID_AMOUNT");
        assert_eq!(LedgerError::InvalidTransfer.code(), "INVALID_TRANSFER");
        assert_eq!(LedgerError::NotFound(AccountId(1)).code(), "NOT_FOUND");
        assert_eq!(
            LedgerError::InsufficientFunds {
                account: AccountId(1),
                requested: dec!(10),
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(LedgerError::DuplicateRequest("k".into()).code(), "CONFLICT");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidAmount.http_status(), 400);
        assert_eq!(LedgerError::NotFound(AccountId(9)).http_status(), 404);
        assert_eq!(LedgerError::Transient("x".into()).http_status(), 503);
        assert_eq!(LedgerError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(LedgerError::Transient("timeout".into()).is_retryable());
        assert!(!LedgerError::Internal("boom".into()).is_retryable());
        assert!(!LedgerError::InvalidAmount.is_retryable());
    }

    #[test]
    fn test_public_message_hides_store_text() {
        let err = LedgerError::Internal("relation \"accounts\" does not exist".into());
        assert!(!err.public_message().contains("relation"));

        let err = LedgerError::Transient("could not serialize access".into());
        assert!(!err.public_message().contains("serialize"));

        let err = LedgerError::NotFound(AccountId(42));
        assert_eq!(err.public_message(), "Account not found: 42");
    }

    #[test]
    fn test_from_sqlx_error() {
        assert!(matches!(
            LedgerError::from(sqlx::Error::PoolTimedOut),
            LedgerError::Transient(_)
        ));
        assert!(matches!(
            LedgerError::from(sqlx::Error::RowNotFound),
            LedgerError::Internal(_)
        ));
    }
}

use anyhow::Error as ANYHOW_ERROR;
use bigdecimal::ParseBigDecimalError as BIG_DECIMAL_ERROR;
use serde_json::Error as JSON_ERROR;
use sqlx::error::Error as SQL_ERROR;
use std::{
    env::VarError, io::Error as IO_ERROR, num::ParseIntError,
    str::ParseBoolError as PARSE_BOOL_ERROR,
};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::subscriber::SetGlobalDefaultError as TRACING_GLOBAL_DEFAULT_ERROR;

use crate::dao::{DEADLOCK_ERROR, DUPLICATE_ERROR, SERIALIZATION_ERROR};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Insufficient PDES balance: {0}")]
    InsufficientTokenBalance(String),

    #[error("Insufficient supply: {0}")]
    InsufficientSupply(String),

    #[error("Deposit cap exceeded: {0}")]
    DepositCapExceeded(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Already confirmed: {0}")]
    AlreadyConfirmed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Account blocked: {0}")]
    AccountBlocked(i64),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("{0}")]
    Io(#[from] IO_ERROR),

    #[error("{0}")]
    INT(#[from] ParseIntError),

    #[error("{0}")]
    SQL(#[from] SQL_ERROR),

    #[error("{0}")]
    VAR(#[from] VarError),

    #[error("{0}")]
    TokioJoinError(#[from] JoinError),

    #[error("{0}")]
    BigDecimalError(#[from] BIG_DECIMAL_ERROR),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("{0}")]
    JsonError(#[from] JSON_ERROR),

    #[error("Task message error: {0}")]
    TaskError(String),

    #[error("{0}")]
    ParseBoolError(#[from] PARSE_BOOL_ERROR),

    #[error("Tracing error: {0}")]
    SetGlobalDefaultError(#[from] TRACING_GLOBAL_DEFAULT_ERROR),

    #[error("{0}")]
    AnyHowError(#[from] ANYHOW_ERROR),
}

/// Coarse classification handed back to callers of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    InsufficientToken,
    Idempotency,
    NotFound,
    Forbidden,
    StorageConflict,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_)
            | Error::InsufficientSupply(_)
            | Error::DepositCapExceeded(_)
            | Error::InvalidState(_) => ErrorKind::Validation,
            Error::InsufficientBalance(_) => ErrorKind::InsufficientFunds,
            Error::InsufficientTokenBalance(_) => ErrorKind::InsufficientToken,
            Error::DuplicateTransaction(_) | Error::AlreadyConfirmed(_) => {
                ErrorKind::Idempotency
            },
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden(_) | Error::AccountBlocked(_) => {
                ErrorKind::Forbidden
            },
            Error::StorageConflict(_) => ErrorKind::StorageConflict,
            Error::SQL(_) if self.is_retryable() => ErrorKind::StorageConflict,
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::StorageConflict(_) => true,
            Error::SQL(SQL_ERROR::Database(error)) => matches!(
                error.code().as_deref(),
                Some(SERIALIZATION_ERROR) | Some(DEADLOCK_ERROR)
            ),
            _ => false,
        }
    }

    /// Maps a unique violation on an idempotency key to `DuplicateTransaction`.
    pub fn from_unique_violation(error: SQL_ERROR, key: &str) -> Error {
        if let SQL_ERROR::Database(db_error) = &error {
            if db_error.code().as_deref() == Some(DUPLICATE_ERROR) {
                return Error::DuplicateTransaction(format!(
                    "transaction id {} already exists",
                    key
                ));
            }
        }

        Error::SQL(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_are_classified() {
        assert_eq!(
            Error::InsufficientBalance(String::from("x")).kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(
            Error::InsufficientTokenBalance(String::from("x")).kind(),
            ErrorKind::InsufficientToken
        );
        assert_eq!(
            Error::AlreadyConfirmed(String::from("x")).kind(),
            ErrorKind::Idempotency
        );
        assert_eq!(
            Error::DepositCapExceeded(String::from("x")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::AccountBlocked(7).kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(Error::StorageConflict(String::from("oracle")).is_retryable());
        assert!(!Error::Validation(String::from("amount")).is_retryable());
        assert!(!Error::SQL(SQL_ERROR::RowNotFound).is_retryable());
        assert!(!Error::NotFound(String::from("user")).is_retryable());
    }

    #[test]
    fn test_non_database_error_is_not_duplicate() {
        let error = Error::from_unique_violation(SQL_ERROR::RowNotFound, "tx-1");
        assert!(matches!(error, Error::SQL(_)));
    }
}

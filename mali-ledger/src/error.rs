//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount is non-positive, below the configured minimum, or has too
    /// many decimal places
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Available (or locked) balance too low for the requested movement
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Sender and receiver are the same account
    #[error("Self transfer: {0}")]
    SelfTransfer(String),

    /// Account row does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Escrow hold does not exist
    #[error("Escrow not found: {0}")]
    EscrowNotFound(String),

    /// Escrow hold is not in the state the transition requires
    #[error("Invalid escrow state: {0}")]
    InvalidState(String),

    /// Escrow reference could not be resolved to a payee
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Row lock not acquired within the configured timeout
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Supply conservation invariant violated (audit-detected)
    #[error("Conservation violation: {0}")]
    ConservationViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// Whether the caller may retry the operation as-is.
    ///
    /// Only lock acquisition timeouts are retryable; every other error is
    /// a definitive rejection of the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lock_timeout_is_retryable() {
        assert!(Error::LockTimeout("acct:alice".to_string()).is_retryable());
        assert!(!Error::InsufficientFunds("alice".to_string()).is_retryable());
        assert!(!Error::InvalidState("released".to_string()).is_retryable());
    }
}

//! Chain-boundary errors and error classification
//!
//! Every failure a chain client reports is one of a few kinds. The relay
//! engine only branches on two of them: a wait that timed out (the dispatch
//! path waits again on the same transaction) and the contract's
//! "already processed" rejection (resolved as success). The rest is carried as
//! text into the retry queue and the status store.

use alloy::primitives::B256;
use std::time::Duration;
use thiserror::Error;

use crate::contracts::{ALREADY_PROCESSED_ERROR, ALREADY_PROCESSED_SELECTOR};

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Signing, gas estimation, or broadcast failed
    #[error("Submission failed: {0}")]
    Submission(String),

    /// No receipt within a single wait window
    #[error("Timed out while waiting for transaction 0x{tx_hash:x} to be confirmed after {timeout:?}")]
    Timeout { tx_hash: B256, timeout: Duration },

    /// Every wait window elapsed without a receipt
    #[error("Transaction 0x{tx_hash:x} not confirmed after {attempts} attempts")]
    Unconfirmed { tx_hash: B256, attempts: u32 },

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl ChainError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChainError::Timeout { .. })
    }

    /// Whether the destination contract rejected the call because the
    /// operation was already performed
    pub fn is_already_processed(&self) -> bool {
        self.class() == ErrorClass::AlreadyProcessed
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ChainError::Submission(message) | ChainError::Rpc(message) => classify_error(message),
            ChainError::Timeout { .. } | ChainError::Unconfirmed { .. } => ErrorClass::Transient,
        }
    }
}

/// Classifies errors for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Contract reports the operation already happened; resolved as success
    AlreadyProcessed,
    /// Temporary failure (RPC timeout, network issues, node lag)
    Transient,
    /// Rejected in a way a resubmission would reproduce
    Permanent,
    /// Unknown error
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::AlreadyProcessed => "already_processed",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Unknown => "unknown",
        }
    }
}

/// Classify an error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Checked first: the sentinel arrives wrapped in a revert message
    if error_lower.contains(ALREADY_PROCESSED_SELECTOR)
        || error_lower.contains(&ALREADY_PROCESSED_ERROR.to_lowercase())
    {
        return ErrorClass::AlreadyProcessed;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("nonce too low")
        || error_lower.contains("underpriced")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid signature")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

//! Error types for the audit ledger.

use crate::types::EventId;
use std::fmt;
use thiserror::Error;

/// Which chain field failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainField {
    /// The stored link does not point at the preceding event's hash.
    PreviousHash,
    /// The stored digest does not match the recomputed one.
    EventHash,
}

impl fmt::Display for ChainField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainField::PreviousHash => write!(f, "previous_hash"),
            ChainField::EventHash => write!(f, "event_hash"),
        }
    }
}

/// Main error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Event {event_id} failed hash verification on {field}; expected {expected}, found {found}")]
    TamperDetected {
        event_id: EventId,
        field: ChainField,
        expected: String,
        found: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),
}

impl LedgerError {
    /// True for the tamper error raised by verification.
    pub fn is_tamper(&self) -> bool {
        matches!(self, LedgerError::TamperDetected { .. })
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LedgerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LedgerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LedgerError::Deserialization(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

//! Error types for the processed-event ledger.

use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur against the processed-event ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row for this message id already committed. This is the uniqueness
    /// constraint doing its job, not a storage fault: a concurrent or retried
    /// delivery won the race.
    #[error("Message already recorded: {0}")]
    DuplicateMessageId(String),

    /// Message id validation failed (empty or over the column width).
    #[error("Invalid message id: {0}")]
    InvalidMessageId(String),
}

impl LedgerError {
    /// True when the error means the message was already committed by another
    /// writer.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerError::DuplicateMessageId(_))
    }
}

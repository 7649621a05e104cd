//! Failure classification for event processing.
//!
//! Every failure the processor propagates is classified so the delivery layer
//! knows whether redelivery is safe:
//!
//! - [`ProcessingError::Retryable`]: transient condition, no persistent state
//!   changed. The consumer must NOT commit the offset, so the message is
//!   delivered again later.
//! - [`ProcessingError::NonRetryable`]: redelivery cannot fix this (remote
//!   logic error, or a concurrent delivery already committed the message).
//!   The consumer routes the message to the dead-letter topic and may then
//!   commit deliberately.
//! - [`ProcessingError::InvalidMessage`]: malformed envelope or payload;
//!   treated as non-retryable for acknowledgment purposes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Transient failure; safe to redeliver later.
    #[error("retryable failure: {0}")]
    Retryable(#[source] anyhow::Error),

    /// Terminal failure; automatic redelivery must not happen.
    #[error("non-retryable failure: {0}")]
    NonRetryable(#[source] anyhow::Error),

    /// The message itself is unusable (missing header, bad payload).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProcessingError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        ProcessingError::Retryable(err.into())
    }

    pub fn non_retryable(err: impl Into<anyhow::Error>) -> Self {
        ProcessingError::NonRetryable(err.into())
    }

    /// Whether the delivery layer should withhold acknowledgment so the
    /// message is redelivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::Retryable(_))
    }
}

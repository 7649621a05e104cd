//! Idempotent event processor.
//!
//! Guarantees the downstream notification happens effectively once per unique
//! message id despite at-least-once Kafka delivery, crashes, and concurrent
//! redelivery:
//!
//! 1. Advisory duplicate check against the ledger; a hit short-circuits with
//!    zero side effects.
//! 2. Bounded-timeout call to the remote service, with transient failures
//!    classified retryable and server rejections non-retryable.
//! 3. Ledger commit keyed by message id. The storage-level uniqueness
//!    constraint is the real correctness boundary: two invocations that both
//!    slipped past the check in step 1 cannot both commit, and the loser is
//!    classified non-retryable so the downstream call is never re-invoked for
//!    an already-committed message.
//!
//! Strong exactly-once semantics for the downstream call itself are not
//! provided; only the ledger commit is at-most-once.

use std::sync::Arc;

use anyhow::anyhow;
use processed_events::{LedgerError, NewProcessedEvent, ProcessedEventStore};
use tracing::{info, warn};

use crate::error::ProcessingError;
use crate::events::ProductCreatedEvent;
use crate::services::remote::Notifier;

/// Successful completion of `process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// First delivery: downstream call made and ledger row committed.
    Processed,
    /// The ledger already held this message id; nothing was done.
    Duplicate,
}

pub struct EventProcessor {
    store: Arc<dyn ProcessedEventStore>,
    notifier: Arc<dyn Notifier>,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn ProcessedEventStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn process(
        &self,
        event: &ProductCreatedEvent,
        message_id: &str,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        if message_id.is_empty() {
            return Err(ProcessingError::InvalidMessage(
                "empty messageId header".to_string(),
            ));
        }
        if event.product_id.is_empty() {
            return Err(ProcessingError::InvalidMessage(
                "event carries no product id".to_string(),
            ));
        }

        info!(
            message_id = %message_id,
            product_id = %event.product_id,
            title = %event.title,
            "Received product-created event"
        );

        // Step 1: advisory duplicate check. Narrows the race window; the
        // unique constraint in step 3 is what actually prevents double commit.
        match self.store.find_by_message_id(message_id).await {
            Ok(Some(existing)) => {
                info!(
                    message_id = %existing.message_id,
                    processed_at = %existing.processed_at,
                    "Duplicate message, skipping"
                );
                return Ok(ProcessingOutcome::Duplicate);
            }
            Ok(None) => {}
            Err(LedgerError::InvalidMessageId(reason)) => {
                return Err(ProcessingError::InvalidMessage(reason));
            }
            Err(e) => {
                // Lookup trouble is transient from the consumer's point of
                // view: nothing has been committed, redelivery is safe.
                return Err(ProcessingError::retryable(e));
            }
        }

        // Step 2: downstream call, bounded by the client's timeout.
        self.notifier.notify(message_id).await.map_err(|e| {
            warn!(message_id = %message_id, error = %e, "Remote notification failed");
            if e.is_transient() {
                ProcessingError::retryable(e)
            } else {
                ProcessingError::non_retryable(e)
            }
        })?;

        // Step 3: commit. A duplicate-key conflict means a racing delivery
        // already committed this message; the work is done, do not redeliver.
        match self
            .store
            .insert(NewProcessedEvent {
                message_id: message_id.to_string(),
                product_id: event.product_id.clone(),
            })
            .await
        {
            Ok(record) => {
                info!(
                    message_id = %record.message_id,
                    product_id = %record.product_id,
                    "Event processed and committed"
                );
                Ok(ProcessingOutcome::Processed)
            }
            Err(LedgerError::DuplicateMessageId(id)) => Err(ProcessingError::non_retryable(
                anyhow!("message {id} was committed by a concurrent delivery"),
            )),
            Err(LedgerError::InvalidMessageId(reason)) => {
                Err(ProcessingError::InvalidMessage(reason))
            }
            Err(e) => Err(ProcessingError::retryable(e)),
        }
    }
}

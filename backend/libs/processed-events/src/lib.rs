//! # Processed-Event Ledger
//!
//! Durable, append-only record of handled message identifiers, backed by
//! PostgreSQL. Consumers use it to deduplicate at-least-once Kafka delivery:
//! a message id that already has a row in `processed_events` has been fully
//! handled and must not trigger its side effects again.
//!
//! ## Correctness boundary
//!
//! The lookup (`find_by_message_id`) is an advisory fast path only. Two
//! concurrent deliveries of the same message can both miss it. The real
//! guarantee comes from the `UNIQUE` constraint on `message_id`: at most one
//! `insert` can ever commit for a given id, and the loser of a race receives
//! [`LedgerError::DuplicateMessageId`] instead of silently writing a second
//! row. The insert deliberately does NOT use `ON CONFLICT DO NOTHING` so the
//! conflict stays observable and the caller can classify it.
//!
//! ## Usage
//!
//! ```ignore
//! use processed_events::{NewProcessedEvent, PgProcessedEventStore, ProcessedEventStore};
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgProcessedEventStore::new(pool);
//!
//! if store.find_by_message_id("msg-123").await?.is_some() {
//!     // already handled, skip side effects
//!     return Ok(());
//! }
//!
//! // ... perform side effects ...
//!
//! store
//!     .insert(NewProcessedEvent {
//!         message_id: "msg-123".to_string(),
//!         product_id: "prod-1".to_string(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Database migration
//!
//! Apply `migrations/001_create_processed_events_table.sql` before use; it
//! creates the table with the unique index on `message_id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

mod error;

pub use error::{LedgerError, LedgerResult};

/// Maximum accepted length for a message identifier, matching the column width.
pub const MAX_MESSAGE_ID_LEN: usize = 255;

/// A committed ledger row: proof that a message has been fully handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Auto-generated row id.
    pub id: Uuid,

    /// Unique message identifier (from the Kafka `messageId` header).
    pub message_id: String,

    /// Product the originating event referred to.
    pub product_id: String,

    /// When the message finished processing.
    pub processed_at: DateTime<Utc>,
}

/// Input for a new ledger row. The row id and timestamp are assigned by the
/// database on insert.
#[derive(Debug, Clone)]
pub struct NewProcessedEvent {
    pub message_id: String,
    pub product_id: String,
}

/// Storage seam consumed by the event processor.
///
/// Implementations must enforce uniqueness of `message_id` at the storage
/// layer, not merely in application logic.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Look up a ledger row by message id.
    ///
    /// Returns `Ok(None)` when the message has not been recorded. This is the
    /// advisory duplicate check; it narrows the race window but cannot close it.
    async fn find_by_message_id(&self, message_id: &str) -> LedgerResult<Option<ProcessedEvent>>;

    /// Append a ledger row for a fully handled message.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateMessageId`] when a row for the same
    /// message id already committed (a concurrent or retried delivery won the
    /// race), and [`LedgerError::Database`] for other storage failures.
    async fn insert(&self, record: NewProcessedEvent) -> LedgerResult<ProcessedEvent>;
}

/// PostgreSQL-backed ledger store.
///
/// Cheap to clone; can be shared across tasks behind `Arc<dyn ProcessedEventStore>`.
#[derive(Clone)]
pub struct PgProcessedEventStore {
    pool: PgPool,
}

impl PgProcessedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete ledger rows older than `cutoff`.
    ///
    /// The ledger is append-only in normal operation; this is an
    /// operator-driven maintenance sweep to bound table growth. Returns the
    /// number of rows deleted.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE processed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Deleted old processed-event records");
        } else {
            debug!("No old processed-event records to delete");
        }

        Ok(deleted)
    }
}

/// Validate a message identifier before it touches the database.
fn validate_message_id(message_id: &str) -> LedgerResult<()> {
    if message_id.is_empty() {
        return Err(LedgerError::InvalidMessageId(
            "message id cannot be empty".to_string(),
        ));
    }

    if message_id.len() > MAX_MESSAGE_ID_LEN {
        return Err(LedgerError::InvalidMessageId(format!(
            "message id too long: {} characters (max {})",
            message_id.len(),
            MAX_MESSAGE_ID_LEN
        )));
    }

    Ok(())
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<ProcessedEvent, sqlx::Error> {
    Ok(ProcessedEvent {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        product_id: row.try_get("product_id")?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait]
impl ProcessedEventStore for PgProcessedEventStore {
    async fn find_by_message_id(&self, message_id: &str) -> LedgerResult<Option<ProcessedEvent>> {
        validate_message_id(message_id)?;

        let row = sqlx::query(
            r#"
            SELECT id, message_id, product_id, processed_at
            FROM processed_events
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let event = row_to_event(&row)?;
                debug!(message_id = %message_id, "Message already recorded in ledger");
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, record: NewProcessedEvent) -> LedgerResult<ProcessedEvent> {
        validate_message_id(&record.message_id)?;

        // Plain INSERT: a uniqueness conflict must surface to the caller so it
        // can classify the race, rather than being swallowed by ON CONFLICT.
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (message_id, product_id)
            VALUES ($1, $2)
            RETURNING id, message_id, product_id, processed_at
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.product_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                let event = row_to_event(&row)?;
                info!(
                    message_id = %event.message_id,
                    product_id = %event.product_id,
                    "Recorded processed event"
                );
                Ok(event)
            }
            Err(e) => {
                // PostgreSQL unique violation: SQLSTATE 23505
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.code().as_deref() == Some("23505") {
                        debug!(
                            message_id = %record.message_id,
                            "Concurrent delivery already committed this message"
                        );
                        return Err(LedgerError::DuplicateMessageId(record.message_id));
                    }
                }
                Err(LedgerError::Database(e))
            }
        }
    }
}

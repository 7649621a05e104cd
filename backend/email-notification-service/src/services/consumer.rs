//! Kafka subscription and dispatch loop.
//!
//! Explicit rendering of what a framework listener would otherwise do: read
//! envelopes, extract the `messageId` header, decode the payload, invoke the
//! processor, and gate the offset commit on the outcome.
//!
//! Acknowledgment contract:
//! - `Processed` / `Duplicate`: commit the offset.
//! - Retryable failure: retry in place with exponential backoff; once
//!   attempts are exhausted, return without committing so a supervised
//!   restart resumes from the last committed offset and the message is
//!   redelivered. Never silent loss.
//! - Non-retryable failure or unusable message: publish to the dead-letter
//!   topic first, then commit (the deliberate-swallow path). If the
//!   dead-letter publish itself fails, the offset stays uncommitted.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{KafkaConfig, RetryConfig};
use crate::error::ProcessingError;
use crate::events::ProductCreatedEvent;
use crate::metrics;
use crate::services::dead_letter::{DeadLetterProducer, DeadLetterRecord};
use crate::services::processor::{EventProcessor, ProcessingOutcome};

/// Header carrying the unique message identifier used for deduplication.
const MESSAGE_ID_HEADER: &str = "messageId";

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("retries exhausted for message {message_id}")]
    RetriesExhausted {
        message_id: String,
        #[source]
        source: ProcessingError,
    },

    #[error("dead-letter publish failed for message {message_id}: {source}")]
    DeadLetter {
        message_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// In-place retry policy for retryable processing failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given attempt, capped.
    pub fn get_backoff(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_ms.saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(backoff.min(self.max_backoff_ms))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_ms: cfg.backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
        }
    }
}

pub struct ProductEventConsumer {
    consumer: StreamConsumer,
    processor: Arc<EventProcessor>,
    dead_letter: DeadLetterProducer,
    retry_policy: RetryPolicy,
}

impl ProductEventConsumer {
    pub fn new(
        config: &KafkaConfig,
        processor: Arc<EventProcessor>,
        dead_letter: DeadLetterProducer,
        retry_policy: RetryPolicy,
    ) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false") // Manual commit, gated on outcome
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;
        info!(topic = %config.topic, group_id = %config.group_id, "Subscribed to topic");

        Ok(Self {
            consumer,
            processor,
            dead_letter,
            retry_policy,
        })
    }

    /// Consume until a message exhausts its retries or dead-lettering fails.
    ///
    /// Returning an error leaves the offending offset uncommitted; a
    /// supervised restart resumes from the last committed offset.
    pub async fn run(&self) -> Result<(), ConsumerError> {
        info!("Starting product-created event consumer");

        loop {
            match self.consumer.recv().await {
                Ok(msg) => self.handle_message(&msg).await?,
                Err(e) => {
                    error!("Kafka consumer error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: &BorrowedMessage<'_>) -> Result<(), ConsumerError> {
        let message_id = match header_value(msg, MESSAGE_ID_HEADER) {
            Some(id) => id,
            None => {
                warn!(
                    topic = msg.topic(),
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "Message without {} header",
                    MESSAGE_ID_HEADER
                );
                return self
                    .dead_letter_and_commit(msg, "<missing>", "missing messageId header")
                    .await;
            }
        };

        let event: ProductCreatedEvent = match msg
            .payload()
            .ok_or_else(|| "empty payload".to_string())
            .and_then(|p| serde_json::from_slice(p).map_err(|e| e.to_string()))
        {
            Ok(event) => event,
            Err(reason) => {
                warn!(message_id = %message_id, "Undecodable payload: {}", reason);
                return self.dead_letter_and_commit(msg, &message_id, &reason).await;
            }
        };

        let mut attempt = 0;
        loop {
            match self.processor.process(&event, &message_id).await {
                Ok(ProcessingOutcome::Processed) => {
                    metrics::inc_processed();
                    self.commit(msg);
                    return Ok(());
                }
                Ok(ProcessingOutcome::Duplicate) => {
                    metrics::inc_duplicate_skipped();
                    self.commit(msg);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    metrics::inc_retryable_failure();
                    if !self.retry_policy.should_retry(attempt) {
                        error!(
                            message_id = %message_id,
                            attempts = attempt + 1,
                            "Retries exhausted, leaving offset uncommitted for redelivery"
                        );
                        return Err(ConsumerError::RetriesExhausted {
                            message_id,
                            source: e,
                        });
                    }
                    let backoff = self.retry_policy.get_backoff(attempt);
                    warn!(
                        message_id = %message_id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::inc_non_retryable_failure();
                    warn!(message_id = %message_id, error = %e, "Non-retryable failure, dead-lettering");
                    return self
                        .dead_letter_and_commit(msg, &message_id, &e.to_string())
                        .await;
                }
            }
        }
    }

    /// Route a terminally failed message to the DLQ, then acknowledge it.
    /// Commit only happens after the DLQ publish succeeds.
    async fn dead_letter_and_commit(
        &self,
        msg: &BorrowedMessage<'_>,
        message_id: &str,
        reason: &str,
    ) -> Result<(), ConsumerError> {
        let record = DeadLetterRecord::new(message_id, msg.topic(), reason)
            .with_origin(msg.partition(), msg.offset())
            .with_payload(
                msg.payload()
                    .map(|p| String::from_utf8_lossy(p).into_owned()),
            );

        self.dead_letter
            .publish(&record)
            .await
            .map_err(|e| ConsumerError::DeadLetter {
                message_id: message_id.to_string(),
                source: e,
            })?;

        metrics::inc_dead_lettered();
        self.commit(msg);
        Ok(())
    }

    fn commit(&self, msg: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(msg, CommitMode::Async) {
            warn!("Failed to commit offset: {}", e);
        }
    }
}

fn header_value(msg: &BorrowedMessage<'_>, name: &str) -> Option<String> {
    msg.headers().and_then(|headers| {
        headers
            .iter()
            .find(|h| h.key == name)
            .and_then(|h| h.value)
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();

        let backoff0 = policy.get_backoff(0);
        let backoff1 = policy.get_backoff(1);
        let backoff2 = policy.get_backoff(2);

        assert!(backoff1 > backoff0);
        assert!(backoff2 > backoff1);
        assert_eq!(policy.get_backoff(30), Duration::from_millis(5000));
    }

    #[test]
    fn test_retry_policy_max_retries() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let cfg = RetryConfig {
            max_retries: 5,
            backoff_ms: 50,
            max_backoff_ms: 1000,
        };
        let policy = RetryPolicy::from(&cfg);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.get_backoff(0), Duration::from_millis(50));
        assert_eq!(policy.get_backoff(10), Duration::from_millis(1000));
    }
}

//! Dead-letter producer.
//!
//! Terminally failed messages are published here for manual inspection
//! instead of being redelivered. The record keeps enough of the original
//! envelope (topic, partition, offset, raw payload) to replay by hand.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Message identifier from the original envelope, or `<missing>`.
    pub message_id: String,
    /// Topic the message was consumed from.
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Why processing failed terminally.
    pub error: String,
    pub failed_at: DateTime<Utc>,
    /// Original payload, lossily decoded for inspection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl DeadLetterRecord {
    pub fn new(message_id: &str, topic: &str, error: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            topic: topic.to_string(),
            partition: -1,
            offset: -1,
            error: error.to_string(),
            failed_at: Utc::now(),
            payload: None,
        }
    }

    pub fn with_origin(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    pub fn with_payload(mut self, payload: Option<String>) -> Self {
        self.payload = payload;
        self
    }
}

pub struct DeadLetterProducer {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl DeadLetterProducer {
    pub fn new(brokers: &str, topic: String) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .context("Failed to create dead-letter producer")?;

        Ok(Self {
            producer,
            topic,
            send_timeout: Duration::from_secs(5),
        })
    }

    pub async fn publish(&self, record: &DeadLetterRecord) -> Result<()> {
        let payload =
            serde_json::to_vec(record).context("Failed to serialize dead-letter record")?;

        let future_record = FutureRecord::to(&self.topic)
            .key(&record.message_id)
            .payload(&payload);

        match self.producer.send(future_record, self.send_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %self.topic,
                    partition = partition,
                    offset = offset,
                    message_id = %record.message_id,
                    "Published message to dead-letter topic"
                );
                Ok(())
            }
            Err((e, _)) => {
                error!(
                    message_id = %record.message_id,
                    error = %e,
                    "Failed to publish to dead-letter topic"
                );
                Err(anyhow::anyhow!("Kafka send error: {}", e))
            }
        }
    }
}

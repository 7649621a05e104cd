use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub remote: RemoteServiceConfig,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub dead_letter_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServiceConfig {
    pub base_url: String,
    /// Per-request timeout in milliseconds. Exceeding it is a retryable failure.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic: std::env::var("KAFKA_TOPIC")
                    .unwrap_or_else(|_| "product-created-events-topic".to_string()),
                group_id: std::env::var("KAFKA_GROUP_ID")
                    .unwrap_or_else(|_| "email-notification-consumer".to_string()),
                dead_letter_topic: std::env::var("KAFKA_DEAD_LETTER_TOPIC")
                    .unwrap_or_else(|_| "product-created-events-dlq".to_string()),
            },
            remote: RemoteServiceConfig {
                base_url: std::env::var("REMOTE_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:8082/response/200".to_string()),
                timeout_ms: std::env::var("REMOTE_SERVICE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            retry: RetryConfig {
                max_retries: std::env::var("PROCESSING_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                backoff_ms: std::env::var("PROCESSING_BACKOFF_MS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                max_backoff_ms: std::env::var("PROCESSING_MAX_BACKOFF_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()?,
            },
        })
    }
}

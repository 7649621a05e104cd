use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use email_notification_service::services::{
    DeadLetterProducer, EventProcessor, ProductEventConsumer, RemoteServiceClient, RetryPolicy,
};
use email_notification_service::Config;
use processed_events::PgProcessedEventStore;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting email notification service");

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    let store = Arc::new(PgProcessedEventStore::new(pool));

    let notifier = Arc::new(
        RemoteServiceClient::new(
            &config.remote.base_url,
            Duration::from_millis(config.remote.timeout_ms),
        )
        .context("Failed to build remote service client")?,
    );

    let processor = Arc::new(EventProcessor::new(store, notifier));

    let dead_letter =
        DeadLetterProducer::new(&config.kafka.brokers, config.kafka.dead_letter_topic.clone())?;

    let consumer = ProductEventConsumer::new(
        &config.kafka,
        processor,
        dead_letter,
        RetryPolicy::from(&config.retry),
    )
    .context("Failed to create Kafka consumer")?;

    consumer.run().await.context("Consumer loop terminated")
}

use once_cell::sync::Lazy;
use prometheus::{IntCounter, Opts};

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .unwrap_or_else(|_| panic!("failed to create {name}"));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|_| panic!("failed to register {name}"));
    counter
}

static EVENTS_PROCESSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "email_notification_events_processed_total",
        "Events processed for the first time (downstream call made, ledger row committed)",
    )
});

static DUPLICATES_SKIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "email_notification_duplicates_skipped_total",
        "Redelivered messages skipped via the ledger duplicate check",
    )
});

static RETRYABLE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "email_notification_retryable_failures_total",
        "Processing attempts that failed with a retryable classification",
    )
});

static NON_RETRYABLE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "email_notification_non_retryable_failures_total",
        "Processing attempts that failed terminally",
    )
});

static DEAD_LETTERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "email_notification_dead_lettered_total",
        "Messages routed to the dead-letter topic",
    )
});

pub fn inc_processed() {
    EVENTS_PROCESSED_TOTAL.inc();
}

pub fn inc_duplicate_skipped() {
    DUPLICATES_SKIPPED_TOTAL.inc();
}

pub fn inc_retryable_failure() {
    RETRYABLE_FAILURES_TOTAL.inc();
}

pub fn inc_non_retryable_failure() {
    NON_RETRYABLE_FAILURES_TOTAL.inc();
}

pub fn inc_dead_lettered() {
    DEAD_LETTERED_TOTAL.inc();
}

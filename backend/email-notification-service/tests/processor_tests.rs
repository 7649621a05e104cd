//! Processor behavior tests against in-memory collaborators.
//!
//! These tests verify the idempotent-processing contract:
//! 1. First delivery: one downstream call, one ledger row
//! 2. Redelivery of a recorded message: zero downstream calls, success
//! 3. Timeout / connection failure: retryable, ledger unchanged
//! 4. Server error status: non-retryable, ledger unchanged
//! 5. Concurrent unseen deliveries: exactly one ledger commit wins, the
//!    loser is classified non-retryable

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use email_notification_service::services::{
    EventProcessor, Notifier, ProcessingOutcome, RemoteServiceError,
};
use email_notification_service::{ProcessingError, ProductCreatedEvent};
use processed_events::{LedgerError, LedgerResult, NewProcessedEvent, ProcessedEvent, ProcessedEventStore};
use uuid::Uuid;

/// Ledger fake enforcing message-id uniqueness on insert.
///
/// With `blind_lookups` set, `find_by_message_id` always misses, simulating
/// two concurrent deliveries that both pass the advisory check.
struct InMemoryStore {
    records: Mutex<HashMap<String, ProcessedEvent>>,
    blind_lookups: bool,
}

impl InMemoryStore {
    fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            blind_lookups: false,
        }
    }

    fn with_blind_lookups() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            blind_lookups: true,
        }
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn get(&self, message_id: &str) -> Option<ProcessedEvent> {
        self.records.lock().unwrap().get(message_id).cloned()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryStore {
    async fn find_by_message_id(&self, message_id: &str) -> LedgerResult<Option<ProcessedEvent>> {
        if self.blind_lookups {
            return Ok(None);
        }
        Ok(self.records.lock().unwrap().get(message_id).cloned())
    }

    async fn insert(&self, record: NewProcessedEvent) -> LedgerResult<ProcessedEvent> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.message_id) {
            return Err(LedgerError::DuplicateMessageId(record.message_id));
        }
        let event = ProcessedEvent {
            id: Uuid::new_v4(),
            message_id: record.message_id.clone(),
            product_id: record.product_id,
            processed_at: Utc::now(),
        };
        records.insert(record.message_id, event.clone());
        Ok(event)
    }
}

/// Ledger fake that fails every call with a storage-level error.
struct FailingStore;

#[async_trait]
impl ProcessedEventStore for FailingStore {
    async fn find_by_message_id(&self, _message_id: &str) -> LedgerResult<Option<ProcessedEvent>> {
        Err(LedgerError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn insert(&self, _record: NewProcessedEvent) -> LedgerResult<ProcessedEvent> {
        Err(LedgerError::Database(sqlx::Error::PoolTimedOut))
    }
}

/// Ledger fake whose lookup always misses but whose insert fails with a
/// storage-level error.
struct InsertFailingStore;

#[async_trait]
impl ProcessedEventStore for InsertFailingStore {
    async fn find_by_message_id(&self, _message_id: &str) -> LedgerResult<Option<ProcessedEvent>> {
        Ok(None)
    }

    async fn insert(&self, _record: NewProcessedEvent) -> LedgerResult<ProcessedEvent> {
        Err(LedgerError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[derive(Clone, Copy)]
enum RemoteBehavior {
    Succeed,
    TimeOut,
    RefuseConnection,
    RespondWithStatus(u16),
    FailInTransport,
}

struct FakeNotifier {
    behavior: RemoteBehavior,
    calls: AtomicU32,
}

impl FakeNotifier {
    fn new(behavior: RemoteBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, _message_id: &str) -> Result<(), RemoteServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            RemoteBehavior::Succeed => Ok(()),
            RemoteBehavior::TimeOut => Err(RemoteServiceError::Timeout(Duration::from_secs(5))),
            RemoteBehavior::RefuseConnection => Err(RemoteServiceError::Unreachable(
                "connection refused".to_string(),
            )),
            RemoteBehavior::RespondWithStatus(status) => {
                Err(RemoteServiceError::Status { status })
            }
            RemoteBehavior::FailInTransport => Err(RemoteServiceError::Transport(
                "malformed response".to_string(),
            )),
        }
    }
}

fn processor(
    store: Arc<InMemoryStore>,
    notifier: Arc<FakeNotifier>,
) -> EventProcessor {
    EventProcessor::new(store, notifier)
}

fn product_event(product_id: &str) -> ProductCreatedEvent {
    ProductCreatedEvent {
        product_id: product_id.to_string(),
        title: "Standing Desk".to_string(),
    }
}

#[tokio::test]
async fn test_first_delivery_calls_downstream_once_and_commits() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::Succeed));
    let processor = processor(store.clone(), notifier.clone());

    let outcome = processor
        .process(&product_event("P-100"), "M-1")
        .await
        .expect("processing should succeed");

    assert_eq!(outcome, ProcessingOutcome::Processed);
    assert_eq!(notifier.call_count(), 1);
    assert_eq!(store.len(), 1);

    let record = store.get("M-1").expect("ledger row should exist");
    assert_eq!(record.product_id, "P-100");
}

#[tokio::test]
async fn test_second_delivery_is_a_noop() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::Succeed));
    let processor = processor(store.clone(), notifier.clone());

    processor
        .process(&product_event("P-100"), "M-1")
        .await
        .expect("first delivery should succeed");

    let outcome = processor
        .process(&product_event("P-100"), "M-1")
        .await
        .expect("redelivery should succeed");

    assert_eq!(outcome, ProcessingOutcome::Duplicate);
    assert_eq!(notifier.call_count(), 1, "no second downstream call");
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_timeout_is_retryable_and_ledger_unchanged() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::TimeOut));
    let processor = processor(store.clone(), notifier.clone());

    let err = processor
        .process(&product_event("P-100"), "M-1")
        .await
        .unwrap_err();

    assert!(err.is_retryable(), "timeout must be retryable, got {err}");
    assert_eq!(store.len(), 0, "no ledger row on failure");
}

#[tokio::test]
async fn test_connection_refused_is_retryable_and_ledger_unchanged() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::RefuseConnection));
    let processor = processor(store.clone(), notifier.clone());

    let err = processor
        .process(&product_event("P-200"), "M-2")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_server_error_is_non_retryable_and_ledger_unchanged() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::RespondWithStatus(503)));
    let processor = processor(store.clone(), notifier.clone());

    let err = processor
        .process(&product_event("P-300"), "M-3")
        .await
        .unwrap_err();

    assert!(
        matches!(err, ProcessingError::NonRetryable(_)),
        "503 must be non-retryable, got {err}"
    );
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_unclassified_downstream_failure_is_non_retryable() {
    // Anything that is neither a connection failure nor a timeout (malformed
    // response, decode trouble) must not be redelivered automatically.
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::FailInTransport));
    let processor = processor(store.clone(), notifier.clone());

    let err = processor
        .process(&product_event("P-400"), "M-4")
        .await
        .unwrap_err();

    assert!(
        matches!(err, ProcessingError::NonRetryable(_)),
        "unclassified failure must be non-retryable, got {err}"
    );
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_ledger_lookup_failure_is_retryable_with_no_downstream_call() {
    let store = Arc::new(FailingStore);
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::Succeed));
    let processor = EventProcessor::new(store, notifier.clone());

    let err = processor
        .process(&product_event("P-500"), "M-6")
        .await
        .unwrap_err();

    assert!(err.is_retryable(), "lookup trouble must be retryable, got {err}");
    assert_eq!(
        notifier.call_count(),
        0,
        "no downstream call when the duplicate check cannot run"
    );
}

#[tokio::test]
async fn test_ledger_insert_failure_is_retryable() {
    let store = Arc::new(InsertFailingStore);
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::Succeed));
    let processor = EventProcessor::new(store, notifier.clone());

    let err = processor
        .process(&product_event("P-600"), "M-7")
        .await
        .unwrap_err();

    assert!(
        err.is_retryable(),
        "storage trouble on commit must be retryable, got {err}"
    );
    assert_eq!(notifier.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_commit_exactly_once() {
    // Blind lookups force both invocations past the advisory check, so both
    // call downstream; the ledger uniqueness constraint decides the race.
    let store = Arc::new(InMemoryStore::with_blind_lookups());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::Succeed));
    let processor = Arc::new(processor(store.clone(), notifier.clone()));

    let event = product_event("P-100");
    let first = {
        let processor = processor.clone();
        let event = event.clone();
        tokio::spawn(async move { processor.process(&event, "M-race").await })
    };
    let second = {
        let processor = processor.clone();
        let event = event.clone();
        tokio::spawn(async move { processor.process(&event, "M-race").await })
    };

    let results = [
        first.await.expect("task panicked"),
        second.await.expect("task panicked"),
    ];

    let committed = results
        .iter()
        .filter(|r| matches!(r, Ok(ProcessingOutcome::Processed)))
        .count();
    let lost_race = results
        .iter()
        .filter(|r| matches!(r, Err(ProcessingError::NonRetryable(_))))
        .count();

    assert_eq!(committed, 1, "exactly one invocation commits");
    assert_eq!(lost_race, 1, "the loser sees a non-retryable duplicate");
    assert_eq!(notifier.call_count(), 2, "both passed the advisory check");
    assert_eq!(store.len(), 1, "one ledger row total");
}

#[tokio::test]
async fn test_empty_message_id_is_invalid() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::Succeed));
    let processor = processor(store.clone(), notifier.clone());

    let err = processor.process(&product_event("P-1"), "").await.unwrap_err();

    assert!(matches!(err, ProcessingError::InvalidMessage(_)));
    assert_eq!(notifier.call_count(), 0, "no side effects for bad input");
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_missing_product_id_is_invalid() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FakeNotifier::new(RemoteBehavior::Succeed));
    let processor = processor(store.clone(), notifier.clone());

    let err = processor.process(&product_event(""), "M-5").await.unwrap_err();

    assert!(matches!(err, ProcessingError::InvalidMessage(_)));
    assert_eq!(notifier.call_count(), 0);
    assert_eq!(store.len(), 0);
}

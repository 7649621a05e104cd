pub mod consumer;
pub mod dead_letter;
pub mod processor;
pub mod remote;

pub use consumer::{ConsumerError, ProductEventConsumer, RetryPolicy};
pub use dead_letter::{DeadLetterProducer, DeadLetterRecord};
pub use processor::{EventProcessor, ProcessingOutcome};
pub use remote::{Notifier, RemoteServiceClient, RemoteServiceError};

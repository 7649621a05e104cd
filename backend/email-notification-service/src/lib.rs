pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod services;

pub use config::Config;
pub use error::ProcessingError;
pub use events::ProductCreatedEvent;
pub use services::*;

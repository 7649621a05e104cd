//! Downstream notifier client.
//!
//! Thin HTTP client around the remote notification endpoint. Every request is
//! bounded by the timeout configured at construction, and failures are split
//! into the categories the processor needs for retry classification: only
//! connection failures and timeouts are transient; a server rejection or any
//! failure that cannot be positively identified as a network condition is
//! terminal.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RemoteServiceError {
    /// Connection could not be established (refused, DNS, unroutable).
    #[error("remote service unreachable: {0}")]
    Unreachable(String),

    /// The request exceeded the configured deadline.
    #[error("remote service timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-2xx status.
    #[error("remote service returned status {status}")]
    Status { status: u16 },

    /// Any other failure (malformed response, request build, redirect loop).
    #[error("remote service transport failure: {0}")]
    Transport(String),
}

impl RemoteServiceError {
    /// Transient network conditions are worth redelivering. A server-side
    /// rejection is not, and neither is anything unclassified: redelivering a
    /// failure we cannot positively attribute to the network risks an endless
    /// redelivery loop for a message that will never succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteServiceError::Unreachable(_) | RemoteServiceError::Timeout(_)
        )
    }
}

/// Seam the processor calls through; lets tests substitute a fake remote.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message_id: &str) -> Result<(), RemoteServiceError>;
}

/// reqwest-backed notifier with a bounded per-request timeout.
pub struct RemoteServiceClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl Notifier for RemoteServiceClient {
    async fn notify(&self, message_id: &str) -> Result<(), RemoteServiceError> {
        let response = self
            .client
            .get(&self.base_url)
            .header("messageId", message_id)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteServiceError::Timeout(self.timeout)
                } else if e.is_connect() {
                    RemoteServiceError::Unreachable(e.to_string())
                } else {
                    RemoteServiceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteServiceError::Status {
                status: status.as_u16(),
            });
        }

        debug!(message_id = %message_id, status = %status, "Remote service acknowledged notification");
        Ok(())
    }
}

//! Message transports
//!
//! A transport delivers commands to the store and hands every inbound message
//! to a single consumer through the channel returned by `connect`.

mod http;
mod websocket;

pub use http::HttpTransport;
pub use websocket::{parse_frame, WebSocketTransport};

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::services::client::types::DittoMessage;
use crate::services::client::{ClientError, ClientResult};
use crate::services::config::RetryConfig;
use crate::services::errors::{MigrationError, MigrationResult};

/// Receiving side of a connected transport
pub type Inbound = mpsc::UnboundedReceiver<DittoMessage>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Establish the connection and return the inbound message channel.
    ///
    /// The channel closes when the remote side goes away.
    async fn connect(&self) -> ClientResult<Inbound>;

    /// Fails with `NotReady` before a successful `connect`
    async fn send(&self, message: DittoMessage) -> ClientResult<()>;

    async fn close(&self) -> ClientResult<()>;
}

/// Linear backoff for connection attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Delay after failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Connect, retrying transient failures.
///
/// Credential failures are returned at once. Anything else is retried up to
/// `max_retries` times before the run is given up as a connection failure.
pub async fn connect_with_retry(
    transport: &dyn Transport,
    policy: &RetryPolicy,
) -> MigrationResult<Inbound> {
    let mut attempt = 0;
    loop {
        debug!("Connecting {} transport (attempt {})", transport.name(), attempt);
        match transport.connect().await {
            Ok(inbound) => {
                info!("{} transport connected", transport.name());
                return Ok(inbound);
            }
            Err(ClientError::AuthenticationFailed { message }) => {
                error!("Authentication failed: {}", message);
                return Err(MigrationError::Authentication { message });
            }
            Err(e) => {
                warn!(
                    "Failed to connect {} transport (attempt {}): {}",
                    transport.name(),
                    attempt,
                    e
                );
                if attempt >= policy.max_retries {
                    error!("Max number of retries. Connection failed.");
                    return Err(MigrationError::Connection {
                        attempts: attempt + 1,
                        message: e.to_string(),
                    });
                }
                let delay = policy.delay_for(attempt);
                debug!("Retry after {}ms.", delay.as_millis());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

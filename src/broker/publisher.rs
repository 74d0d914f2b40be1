use super::{BrokerError, BrokerSession, ConnectionManager, ConnectionState, Connector};
use crate::config::PUBLISH_MAX_ATTEMPTS;
use crate::models::NoticeRecord;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode notice: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("gave up after {attempts} publish attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: BrokerError,
    },
    #[error(transparent)]
    Broker(BrokerError),
}

/// Publishes one notice per persistent message, reconnecting in-line when the
/// connection drops under it.
pub struct ReliablePublisher<C: Connector> {
    conn: ConnectionManager<C>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<C: Connector> ReliablePublisher<C> {
    pub fn new(conn: ConnectionManager<C>) -> Self {
        Self {
            conn,
            max_attempts: PUBLISH_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn connection(&mut self) -> &mut ConnectionManager<C> {
        &mut self.conn
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub async fn publish(&mut self, record: &NoticeRecord) -> Result<(), PublishError> {
        let body = serde_json::to_vec(record)?;
        self.publish_bytes(&body).await?;
        debug!(entity_id = %record.entity_id, "Published");
        Ok(())
    }

    /// Sends `body` until the broker confirms it. Connection-level failures
    /// reconnect and resend the same body; anything else fails right away.
    pub async fn publish_bytes(&mut self, body: &[u8]) -> Result<(), PublishError> {
        let queue = self.conn.queue().to_string();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.conn.ensure_connected().await {
                Ok(session) => session.publish(&queue, body).await,
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_connection_level() => return Err(PublishError::Broker(e)),
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %err, "Publish retries exhausted");
                self.conn.disconnect().await;
                return Err(PublishError::RetriesExhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            warn!(attempt, error = %err, "Publish failed on a dead connection, reconnecting");
            self.conn.disconnect().await;
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }

    pub async fn close(&mut self) {
        self.conn.disconnect().await;
    }
}

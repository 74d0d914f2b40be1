//! Durable queue plumbing shared by the harvester (publish side) and the
//! organizer (consume side).
//!
//! Both sides go through a [`ConnectionManager`] that owns the broker
//! connection and re-opens it on demand. The broker itself sits behind the
//! [`Connector`] / [`BrokerSession`] traits: [`amqp`] talks AMQP 0-9-1, and
//! [`memory`] keeps everything in-process for tests.

pub mod amqp;
pub mod consumer;
pub mod memory;
pub mod publisher;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Connection or channel is gone: closed, transport lost, heartbeat missed.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
    /// The broker refused the message (negative publisher confirm).
    #[error("broker rejected message: {0}")]
    Rejected(String),
    #[error("broker protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Failures a fresh connection can fix.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, BrokerError::ConnectionLost(_))
    }
}

/// Acknowledgement handle attached to one delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// One message taken off the queue, not yet settled.
pub struct Delivery {
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, redelivered: bool, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            body,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// An open connection + channel to the broker.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    fn is_open(&self) -> bool;

    /// Declares `queue` as durable. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Sends one persistent JSON message and waits for the broker to accept it.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Starts a subscription with at most `prefetch` unacknowledged deliveries.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError>;

    async fn close(&self);
}

/// Opens sessions against one broker endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: BrokerSession;

    async fn open(&self) -> Result<Self::Session, BrokerError>;

    /// Endpoint description for logs; must not leak credentials.
    fn endpoint(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns the broker connection for one role and re-opens it on demand.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    queue: String,
    session: Option<C::Session>,
    state: ConnectionState,
    role: &'static str,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, queue: impl Into<String>, role: &'static str) -> Self {
        Self {
            connector,
            queue: queue.into(),
            session: None,
            state: ConnectionState::Disconnected,
            role,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> ConnectionState {
        match self.state {
            ConnectionState::Connected if !self.session_open() => ConnectionState::Disconnected,
            state => state,
        }
    }

    fn session_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_open())
    }

    /// Returns the live session, opening a new one if the old one died.
    /// Calling it on a healthy connection does nothing.
    pub async fn ensure_connected(&mut self) -> Result<&C::Session, BrokerError> {
        if !self.session_open() {
            if self.session.is_some() {
                warn!(role = self.role, "Broker session lost, reconnecting");
            }
            self.reconnect().await?;
        }
        self.session
            .as_ref()
            .ok_or_else(|| BrokerError::ConnectionLost("no session".to_string()))
    }

    /// Tears down whatever is left of the current session and opens a new one.
    pub async fn reconnect(&mut self) -> Result<(), BrokerError> {
        self.disconnect().await;
        self.state = ConnectionState::Connecting;

        let session = match self.connector.open().await {
            Ok(session) => session,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        if let Err(e) = session.declare_queue(&self.queue).await {
            session.close().await;
            self.state = ConnectionState::Disconnected;
            return Err(e);
        }

        self.session = Some(session);
        self.state = ConnectionState::Connected;
        info!(
            role = self.role,
            endpoint = %self.connector.endpoint(),
            queue = %self.queue,
            "Broker connection established"
        );
        Ok(())
    }

    /// Initial connection. Exhausting the attempts is fatal for the process.
    pub async fn connect_with_retry(&mut self, max_attempts: u32, delay: Duration) -> Result<()> {
        for attempt in 1..=max_attempts {
            match self.reconnect().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts => {
                    info!(
                        role = self.role,
                        attempt,
                        error = %e,
                        "Cannot reach broker at {}, retrying...",
                        self.connector.endpoint()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    bail!(
                        "Cannot connect to broker at {} after {max_attempts} attempts: {e}",
                        self.connector.endpoint()
                    );
                }
            }
        }

        bail!(
            "Cannot connect to broker at {} after {max_attempts} attempts",
            self.connector.endpoint()
        );
    }

    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.state = ConnectionState::Disconnected;
    }
}

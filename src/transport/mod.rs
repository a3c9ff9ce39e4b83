//! Broker client abstraction
//!
//! This module provides the seam between the agent loop and the concrete
//! broker transport, so the session manager can be exercised against a mock
//! in tests and an MQTT client in production.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Broker transport errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Not connected to a broker")]
    NotConnected,
    #[error("Broker rejected binding: {0}")]
    BindRejected(String),
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
}

/// How the broker delivered an envelope to this agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Point-to-point message addressed to this agent's identity
    Mailbox,
    /// Message received through a pattern-matching stream subscription
    Stream,
}

/// One received broker envelope.
///
/// Transient, one-shot value: created per receive event and discarded after
/// dispatch. Sender and subject travel with the envelope instead of being
/// queried from connection state afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub delivery: Delivery,
    pub sender: String,
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Broker client operations consumed by the session manager.
///
/// A client connects to exactly one broker at a time. Producer and consumer
/// declarations are only valid on a connected client; implementations return
/// [`BrokerError::NotConnected`] otherwise.
#[async_trait]
pub trait BrokerClient: Send {
    /// Connect to the broker under the given identity, waiting at most
    /// `timeout` for the broker to acknowledge.
    async fn connect(
        &mut self,
        endpoint: &str,
        timeout: Duration,
        identity: &str,
    ) -> Result<(), BrokerError>;

    /// Release the connection. No-op when not connected.
    async fn disconnect(&mut self);

    /// Declare this client as a publisher on the named stream.
    async fn set_producer(&mut self, stream: &str) -> Result<(), BrokerError>;

    /// Declare a subscription to the named stream, filtered by a subject
    /// pattern (a regex matched against each message subject).
    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), BrokerError>;

    /// Receive the next envelope. Pends until one arrives; returns `None`
    /// when the connection is gone.
    async fn recv(&mut self) -> Option<InboundEnvelope>;

    fn is_connected(&self) -> bool;
}

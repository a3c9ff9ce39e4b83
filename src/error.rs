//! Top-level error type for device agent operations
//!
//! Component errors live beside their modules ([`crate::config::ConfigError`],
//! [`crate::session::SessionError`], [`crate::transport::BrokerError`],
//! [`crate::protocol::DecodeError`]); this aggregate exists for callers that
//! cross component boundaries, mainly the process bootstrap.

use thiserror::Error;

/// Main error type for device agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Broker session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("Broker transport error: {0}")]
    Broker(#[from] crate::transport::BrokerError),

    #[error("Protocol decode error: {0}")]
    Decode(#[from] crate::protocol::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("{message}")]
    Bootstrap { message: String },
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

//! Typed device protocol messages carried in broker envelopes
//!
//! Broker envelopes carry a JSON payload tagged with a `kind` discriminator.
//! Three kinds exist: `device` (a device announcing itself and its extended
//! attributes), `metric` (one measurement for a device), and `alert` (a rule
//! evaluation outcome). Every kind shares the `device`/`time`/`ttl_ms`
//! header fields; a message is considered expired once `time + ttl_ms` has
//! passed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Payload failed to decode as a device protocol message
#[derive(Debug, Error)]
#[error("malformed device protocol payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Discriminator identifying the logical message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Device,
    Metric,
    Alert,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Device => write!(f, "device"),
            MessageKind::Metric => write!(f, "metric"),
            MessageKind::Alert => write!(f, "alert"),
        }
    }
}

/// A decoded device protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ZmMessage {
    Device(DeviceReport),
    Metric(Metric),
    Alert(Alert),
}

/// Device announcement with extended attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub device: String,
    pub time: DateTime<Utc>,
    pub ttl_ms: u32,
    #[serde(default)]
    pub ext: HashMap<String, String>,
}

/// One measurement for a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub device: String,
    pub time: DateTime<Utc>,
    pub ttl_ms: u32,
    pub metric: String,
    pub value: String,
    pub unit: String,
}

/// Rule evaluation outcome for a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub device: String,
    pub time: DateTime<Utc>,
    pub ttl_ms: u32,
    pub rule: String,
    pub severity: AlertSeverity,
    pub description: String,
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl ZmMessage {
    /// Decode a raw broker payload into a typed message.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encode a message for publishing.
    pub fn encode(&self) -> Vec<u8> {
        // Serialization of these types cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            ZmMessage::Device(_) => MessageKind::Device,
            ZmMessage::Metric(_) => MessageKind::Metric,
            ZmMessage::Alert(_) => MessageKind::Alert,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            ZmMessage::Device(m) => &m.device,
            ZmMessage::Metric(m) => &m.device,
            ZmMessage::Alert(m) => &m.device,
        }
    }

    /// Whether the message's time-to-live has elapsed relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let (time, ttl_ms) = match self {
            ZmMessage::Device(m) => (m.time, m.ttl_ms),
            ZmMessage::Metric(m) => (m.time, m.ttl_ms),
            ZmMessage::Alert(m) => (m.time, m.ttl_ms),
        };
        time + Duration::milliseconds(i64::from(ttl_ms)) < now
    }
}

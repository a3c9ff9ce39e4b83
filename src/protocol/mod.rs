//! Device protocol message types and codec

pub mod messages;

pub use messages::{Alert, AlertSeverity, DecodeError, DeviceReport, MessageKind, Metric, ZmMessage};

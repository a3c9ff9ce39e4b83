//! Observability infrastructure
//!
//! Structured logging via the tracing ecosystem. All agent failures that
//! are non-fatal by contract surface here as log lines, never as values
//! returned over the control channel.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

//! zm-device - broker-bridging device agent
//!
//! A long-lived background worker that bridges a local control channel to a
//! publish/subscribe message broker. The owner process drives the agent
//! through five string-framed commands (`START`, `STOP`, `VERBOSE`,
//! `CONFIG <text>`, `$TERM`); the agent establishes a broker session from a
//! declarative configuration tree, declares one producer stream and any
//! number of pattern-filtered consumer bindings, and decodes/dispatches
//! inbound envelopes carrying typed device protocol payloads.
//!
//! # Overview
//!
//! - [`agent::DeviceAgent`] - single-task event loop multiplexing the
//!   control channel and the broker connection
//! - [`session::BrokerSession`] - configuration-driven producer/consumer
//!   binding over a [`transport::BrokerClient`]
//! - [`agent::Dispatcher`] - envelope decoding and delivery-kind routing
//! - [`transport::mqtt::MqttBrokerClient`] - MQTT v5 broker transport
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use zm_device::agent::DeviceAgent;
//! use zm_device::transport::mqtt::MqttBrokerClient;
//!
//! # async fn demo() {
//! let (agent, mut handle) = DeviceAgent::new(MqttBrokerClient::new());
//! let runner = tokio::spawn(agent.run());
//!
//! handle.ready().await;
//! handle.configure("[malamute]\nendpoint = \"mqtt://localhost:1883\"\n").await;
//! handle.start().await;
//! // ... agent serves broker traffic until:
//! handle.terminate().await;
//! let _ = runner.await;
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use agent::{ControlCommand, ControlHandle, DeviceAgent, DispatchOutcome, Dispatcher};
pub use config::{ConfigError, ConfigTree};
pub use error::{AgentError, AgentResult};
pub use protocol::{DecodeError, MessageKind, ZmMessage};
pub use session::{BrokerSession, ConsumerBinding, SessionConfig, SessionError};
pub use transport::{BrokerClient, BrokerError, Delivery, InboundEnvelope};

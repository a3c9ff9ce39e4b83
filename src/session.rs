//! Configuration-driven broker session management
//!
//! A [`BrokerSession`] owns the broker client and applies a resolved
//! [`SessionConfig`] to it: one connect, an optional producer binding, then
//! consumer bindings in declaration order. Configuration is declarative and
//! re-resolved fully on every START rather than diffed against the previous
//! session.

use crate::config::ConfigTree;
use crate::transport::{BrokerClient, BrokerError, InboundEnvelope};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Bounded connect timeout applied to every connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Broker session setup errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no configuration provided, there is nothing to do")]
    NoConfiguration,
    #[error("can't connect to broker endpoint {endpoint}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: BrokerError,
    },
    #[error("can't set up publisher on stream {stream}")]
    ProducerBindFailed {
        stream: String,
        #[source]
        source: BrokerError,
    },
    #[error("can't set up consumer {stream}/{pattern}")]
    ConsumerBindFailed {
        stream: String,
        pattern: String,
        #[source]
        source: BrokerError,
    },
}

/// One declared consumer binding: stream name and subject pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerBinding {
    pub stream: String,
    pub pattern: String,
}

/// Immutable snapshot of session settings resolved from a configuration
/// tree. Consumer entries preserve the order they appear in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub endpoint: Option<String>,
    pub identity: Option<String>,
    pub producer: Option<String>,
    pub consumers: Vec<ConsumerBinding>,
}

impl SessionConfig {
    /// Derive a snapshot from a configuration tree.
    pub fn resolve(tree: &ConfigTree) -> Self {
        let consumers = tree
            .children("malamute/consumer")
            .into_iter()
            .map(|(stream, pattern)| ConsumerBinding { stream, pattern })
            .collect();

        Self {
            endpoint: tree.resolve("malamute/endpoint").map(str::to_string),
            identity: tree.resolve("server/name").map(str::to_string),
            producer: tree.resolve("malamute/producer").map(str::to_string),
            consumers,
        }
    }
}

/// Owns the broker connection and the live binding state derived from the
/// last successful (or partially successful) START.
pub struct BrokerSession<B: BrokerClient> {
    client: B,
    producer_stream: Option<String>,
    active_consumers: Vec<ConsumerBinding>,
}

impl<B: BrokerClient> BrokerSession<B> {
    pub fn new(client: B) -> Self {
        Self {
            client,
            producer_stream: None,
            active_consumers: Vec::new(),
        }
    }

    /// Establish a broker session from the given configuration tree.
    ///
    /// Bindings are applied strictly in declaration order. The first
    /// failing consumer binding aborts the remaining ones and leaves a
    /// partially-bound but live session behind; bindings already applied
    /// stay applied.
    pub async fn start(&mut self, config: Option<&ConfigTree>) -> Result<(), SessionError> {
        let tree = config.ok_or(SessionError::NoConfiguration)?;
        let resolved = SessionConfig::resolve(tree);

        // Binding state always describes the session being built; a failed
        // reconnect must not leave the dead session's bindings visible
        self.producer_stream = None;
        self.active_consumers.clear();

        let endpoint = resolved.endpoint.clone().unwrap_or_default();
        let identity = resolved.identity.clone().unwrap_or_default();

        self.client
            .connect(&endpoint, CONNECT_TIMEOUT, &identity)
            .await
            .map_err(|source| SessionError::ConnectFailed {
                endpoint: endpoint.clone(),
                source,
            })?;
        info!(%endpoint, %identity, "connected to broker");

        if let Some(stream) = &resolved.producer {
            self.client.set_producer(stream).await.map_err(|source| {
                SessionError::ProducerBindFailed {
                    stream: stream.clone(),
                    source,
                }
            })?;
            self.producer_stream = Some(stream.clone());
            debug!(%stream, "producer binding applied");
        }

        for binding in &resolved.consumers {
            self.client
                .set_consumer(&binding.stream, &binding.pattern)
                .await
                .map_err(|source| SessionError::ConsumerBindFailed {
                    stream: binding.stream.clone(),
                    pattern: binding.pattern.clone(),
                    source,
                })?;
            self.active_consumers.push(binding.clone());
            debug!(
                stream = %binding.stream,
                pattern = %binding.pattern,
                "consumer binding applied"
            );
        }

        info!(
            consumers = self.active_consumers.len(),
            producer = self.producer_stream.as_deref().unwrap_or("(none)"),
            "broker session established"
        );
        Ok(())
    }

    /// Release the live connection and its binding state. Safe to call when
    /// no session exists. The stored configuration is not touched; a
    /// subsequent START reuses the last loaded tree.
    pub async fn stop(&mut self) {
        self.client.disconnect().await;
        self.producer_stream = None;
        self.active_consumers.clear();
    }

    /// Receive the next envelope from the broker connection.
    pub async fn recv(&mut self) -> Option<InboundEnvelope> {
        self.client.recv().await
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn producer_stream(&self) -> Option<&str> {
        self.producer_stream.as_deref()
    }

    pub fn active_consumers(&self) -> &[ConsumerBinding] {
        &self.active_consumers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockBroker;

    fn tree(text: &str) -> ConfigTree {
        ConfigTree::parse(text).unwrap()
    }

    const FULL_CONFIG: &str = r#"
[server]
name = "dev1"

[malamute]
endpoint = "tcp://x"
producer = "alerts"

[malamute.consumer]
cmds = "topic.*"
"#;

    #[tokio::test]
    async fn test_start_without_configuration() {
        let broker = MockBroker::new();
        let connects = broker.connect_attempts.clone();
        let mut session = BrokerSession::new(broker);

        let result = session.start(None).await;

        assert!(matches!(result, Err(SessionError::NoConfiguration)));
        assert!(connects.lock().unwrap().is_empty(), "no connect attempted");
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_start_applies_all_bindings() {
        let broker = MockBroker::new();
        let connects = broker.connect_attempts.clone();
        let producers = broker.producer_binds.clone();
        let consumers = broker.consumer_binds.clone();
        let mut session = BrokerSession::new(broker);

        session.start(Some(&tree(FULL_CONFIG))).await.unwrap();

        assert_eq!(
            connects.lock().unwrap().as_slice(),
            &[("tcp://x".to_string(), "dev1".to_string())]
        );
        assert_eq!(producers.lock().unwrap().as_slice(), &["alerts".to_string()]);
        assert_eq!(
            consumers.lock().unwrap().as_slice(),
            &[("cmds".to_string(), "topic.*".to_string())]
        );
        assert!(session.is_connected());
        assert_eq!(session.producer_stream(), Some("alerts"));
    }

    #[tokio::test]
    async fn test_start_with_empty_consumer_section() {
        let broker = MockBroker::new();
        let consumers = broker.consumer_binds.clone();
        let producers = broker.producer_binds.clone();
        let mut session = BrokerSession::new(broker);

        let config = r#"
[server]
name = "dev1"

[malamute]
endpoint = "tcp://x"
producer = "alerts"
"#;
        session.start(Some(&tree(config))).await.unwrap();

        assert!(consumers.lock().unwrap().is_empty());
        assert_eq!(producers.lock().unwrap().len(), 1);
        assert!(session.active_consumers().is_empty());
    }

    #[tokio::test]
    async fn test_start_without_producer_stream() {
        let broker = MockBroker::new();
        let producers = broker.producer_binds.clone();
        let mut session = BrokerSession::new(broker);

        let config = r#"
[server]
name = "dev1"

[malamute]
endpoint = "tcp://x"

[malamute.consumer]
cmds = "topic.*"
"#;
        session.start(Some(&tree(config))).await.unwrap();

        assert!(producers.lock().unwrap().is_empty());
        assert!(session.producer_stream().is_none());
        assert_eq!(session.active_consumers().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_carries_endpoint() {
        let broker = MockBroker::new().with_connect_failure();
        let mut session = BrokerSession::new(broker);

        let result = session.start(Some(&tree(FULL_CONFIG))).await;

        match result {
            Err(SessionError::ConnectFailed { endpoint, .. }) => {
                assert_eq!(endpoint, "tcp://x");
            }
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_producer_failure_aborts_consumer_bindings() {
        let broker = MockBroker::new().with_producer_failure();
        let consumers = broker.consumer_binds.clone();
        let mut session = BrokerSession::new(broker);

        let result = session.start(Some(&tree(FULL_CONFIG))).await;

        match result {
            Err(SessionError::ProducerBindFailed { stream, .. }) => {
                assert_eq!(stream, "alerts");
            }
            other => panic!("expected ProducerBindFailed, got {other:?}"),
        }
        assert!(consumers.lock().unwrap().is_empty());
        assert!(session.producer_stream().is_none());
        // Connected but unbound; the caller decides whether to retry or STOP
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_first_consumer_failure_aborts_remaining_bindings() {
        let broker = MockBroker::new().with_consumer_failure_at(0);
        let consumers = broker.consumer_binds.clone();
        let producers = broker.producer_binds.clone();
        let mut session = BrokerSession::new(broker);

        let config = r#"
[server]
name = "dev1"

[malamute]
endpoint = "tcp://x"
producer = "alerts"

[malamute.consumer]
first = "a.*"
second = "b.*"
"#;
        let result = session.start(Some(&tree(config))).await;

        match result {
            Err(SessionError::ConsumerBindFailed { stream, pattern, .. }) => {
                assert_eq!(stream, "first");
                assert_eq!(pattern, "a.*");
            }
            other => panic!("expected ConsumerBindFailed, got {other:?}"),
        }

        // Exactly one bind attempt total; the second entry was never tried
        assert_eq!(consumers.lock().unwrap().len(), 1);
        // The producer binding applied before the failure still stands
        assert_eq!(producers.lock().unwrap().len(), 1);
        assert_eq!(session.producer_stream(), Some("alerts"));
        assert!(session.active_consumers().is_empty());
        // The session stays live, partially bound
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_second_consumer_failure_keeps_first_binding() {
        let broker = MockBroker::new().with_consumer_failure_at(1);
        let consumers = broker.consumer_binds.clone();
        let mut session = BrokerSession::new(broker);

        let config = r#"
[server]
name = "dev1"

[malamute]
endpoint = "tcp://x"

[malamute.consumer]
first = "a.*"
second = "b.*"
third = "c.*"
"#;
        let result = session.start(Some(&tree(config))).await;

        assert!(matches!(
            result,
            Err(SessionError::ConsumerBindFailed { .. })
        ));
        // First succeeded, second failed, third never attempted
        assert_eq!(consumers.lock().unwrap().len(), 2);
        assert_eq!(session.active_consumers().len(), 1);
        assert_eq!(session.active_consumers()[0].stream, "first");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let broker = MockBroker::new();
        let disconnects = broker.disconnects.clone();
        let mut session = BrokerSession::new(broker);

        session.stop().await;
        session.stop().await;

        assert!(!session.is_connected());
        assert_eq!(*disconnects.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_clears_binding_state() {
        let broker = MockBroker::new().with_connect_failure_at(1);
        let mut session = BrokerSession::new(broker);
        let config = tree(FULL_CONFIG);

        session.start(Some(&config)).await.unwrap();
        assert_eq!(session.producer_stream(), Some("alerts"));
        assert_eq!(session.active_consumers().len(), 1);

        // Second START fails at connect; the dead session's bindings must
        // not remain visible through the accessors
        let result = session.start(Some(&config)).await;
        assert!(matches!(result, Err(SessionError::ConnectFailed { .. })));
        assert!(!session.is_connected());
        assert_eq!(session.producer_stream(), None);
        assert!(session.active_consumers().is_empty());
    }

    #[tokio::test]
    async fn test_restart_reuses_configuration() {
        let broker = MockBroker::new();
        let connects = broker.connect_attempts.clone();
        let mut session = BrokerSession::new(broker);
        let config = tree(FULL_CONFIG);

        session.start(Some(&config)).await.unwrap();
        session.stop().await;
        assert!(!session.is_connected());

        session.start(Some(&config)).await.unwrap();
        assert!(session.is_connected());
        assert_eq!(connects.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_session_config_resolution_order() {
        let config = SessionConfig::resolve(&tree(
            r#"
[malamute]
endpoint = "tcp://x"

[malamute.consumer]
zeta = "z.*"
alpha = "a.*"
mid = "m.*"
"#,
        ));

        let streams: Vec<&str> = config.consumers.iter().map(|c| c.stream.as_str()).collect();
        assert_eq!(streams, vec!["zeta", "alpha", "mid"]);
        assert_eq!(config.identity, None);
        assert_eq!(config.producer, None);
    }
}

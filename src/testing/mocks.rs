//! Mock broker client for testing
//!
//! Records every connect attempt and binding call behind shared handles so
//! tests can inspect them after the mock has been moved into a session or
//! agent, and supports scripted failures at each step of session setup.

use crate::transport::{BrokerClient, BrokerError, InboundEnvelope};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Mock broker client.
///
/// Clone the `Arc` record handles (and grab [`MockBroker::sender`]) before
/// moving the mock into the component under test.
pub struct MockBroker {
    /// `(endpoint, identity)` per connect attempt
    pub connect_attempts: Arc<Mutex<Vec<(String, String)>>>,
    /// Stream name per producer bind
    pub producer_binds: Arc<Mutex<Vec<String>>>,
    /// `(stream, pattern)` per consumer bind attempt, in call order
    pub consumer_binds: Arc<Mutex<Vec<(String, String)>>>,
    /// Number of disconnect calls
    pub disconnects: Arc<Mutex<u32>>,

    fail_connect: bool,
    fail_connect_at: Option<usize>,
    fail_producer: bool,
    fail_consumer_at: Option<usize>,

    connected: bool,
    inbound_tx: mpsc::UnboundedSender<InboundEnvelope>,
    inbound_rx: mpsc::UnboundedReceiver<InboundEnvelope>,
}

impl MockBroker {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            connect_attempts: Arc::new(Mutex::new(Vec::new())),
            producer_binds: Arc::new(Mutex::new(Vec::new())),
            consumer_binds: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(Mutex::new(0)),
            fail_connect: false,
            fail_connect_at: None,
            fail_producer: false,
            fail_consumer_at: None,
            connected: false,
            inbound_tx,
            inbound_rx,
        }
    }

    /// Every connect attempt fails.
    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// The zero-based `k`-th connect attempt fails.
    pub fn with_connect_failure_at(mut self, k: usize) -> Self {
        self.fail_connect_at = Some(k);
        self
    }

    /// Every producer bind fails.
    pub fn with_producer_failure(mut self) -> Self {
        self.fail_producer = true;
        self
    }

    /// The zero-based `k`-th consumer bind attempt fails.
    pub fn with_consumer_failure_at(mut self, k: usize) -> Self {
        self.fail_consumer_at = Some(k);
        self
    }

    /// Handle for injecting inbound envelopes into `recv()`.
    pub fn sender(&self) -> mpsc::UnboundedSender<InboundEnvelope> {
        self.inbound_tx.clone()
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(
        &mut self,
        endpoint: &str,
        _timeout: Duration,
        identity: &str,
    ) -> Result<(), BrokerError> {
        // A connect attempt supersedes any previous connection
        self.connected = false;

        let attempt = {
            let mut attempts = self.connect_attempts.lock().unwrap();
            attempts.push((endpoint.to_string(), identity.to_string()));
            attempts.len() - 1
        };

        if self.fail_connect || self.fail_connect_at == Some(attempt) {
            return Err(BrokerError::ConnectionFailed(
                "mock connect failure".into(),
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        *self.disconnects.lock().unwrap() += 1;
        self.connected = false;
    }

    async fn set_producer(&mut self, stream: &str) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        if self.fail_producer {
            return Err(BrokerError::BindRejected("mock producer failure".to_string()));
        }
        self.producer_binds.lock().unwrap().push(stream.to_string());
        Ok(())
    }

    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        let attempt = {
            let mut binds = self.consumer_binds.lock().unwrap();
            binds.push((stream.to_string(), pattern.to_string()));
            binds.len() - 1
        };
        if self.fail_consumer_at == Some(attempt) {
            return Err(BrokerError::BindRejected(format!(
                "mock consumer failure at attempt {attempt}"
            )));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<InboundEnvelope> {
        if !self.connected {
            return None;
        }
        self.inbound_rx.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

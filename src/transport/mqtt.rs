//! MQTT-backed broker client
//!
//! Maps the stream/mailbox model onto MQTT v5 topics:
//!
//! - stream deliveries arrive on `zm/stream/{stream}/{sender}/{subject}`
//! - mailbox deliveries arrive on `zm/mailbox/{identity}/{sender}/{subject}`
//!
//! A consumer binding subscribes to the whole stream and filters subjects
//! client-side with the binding's regex pattern, since MQTT filters cannot
//! express subject patterns. The mailbox subscription is established at
//! connect time; it is part of holding an identity on the broker.

use super::{BrokerClient, BrokerError, Delivery, InboundEnvelope};
use async_trait::async_trait;
use regex::Regex;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, EventLoop, MqttOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Connection state reported by the event loop task
#[derive(Debug, Clone, PartialEq)]
enum ConnState {
    Connecting,
    Connected,
    Disconnected(String),
}

/// One registered consumer binding: stream name plus compiled subject filter
struct ConsumerFilter {
    stream: String,
    pattern: Regex,
}

/// MQTT v5 implementation of [`BrokerClient`]
pub struct MqttBrokerClient {
    client: Option<AsyncClient>,
    identity: String,
    producer_stream: Option<String>,
    filters: Arc<Mutex<Vec<ConsumerFilter>>>,
    inbound_rx: Option<mpsc::Receiver<InboundEnvelope>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnState>>,
}

impl MqttBrokerClient {
    pub fn new() -> Self {
        Self {
            client: None,
            identity: String::new(),
            producer_stream: None,
            filters: Arc::new(Mutex::new(Vec::new())),
            inbound_rx: None,
            event_loop_handle: None,
            state_rx: None,
        }
    }

    /// Build MQTT options from an `mqtt://host:port` endpoint URL.
    fn configure_options(endpoint: &str, identity: &str) -> Result<MqttOptions, BrokerError> {
        let url = Url::parse(endpoint)
            .map_err(|_| BrokerError::InvalidEndpoint(endpoint.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| BrokerError::InvalidEndpoint(endpoint.to_string()))?;
        let port = url.port().unwrap_or(1883);

        let mut options = MqttOptions::new(format!("zm-device-{identity}"), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        Ok(options)
    }

    /// Translate an MQTT publish into an envelope, applying the consumer
    /// subject filters to stream deliveries.
    fn route_publish(
        identity: &str,
        filters: &Mutex<Vec<ConsumerFilter>>,
        topic: &str,
        payload: &[u8],
    ) -> Option<InboundEnvelope> {
        let segments: Vec<&str> = topic.split('/').collect();
        match segments.as_slice() {
            ["zm", "mailbox", to, sender, subject @ ..] if *to == identity => {
                Some(InboundEnvelope {
                    delivery: Delivery::Mailbox,
                    sender: sender.to_string(),
                    subject: subject.join("/"),
                    payload: payload.to_vec(),
                })
            }
            ["zm", "stream", stream, sender, subject @ ..] => {
                let subject = subject.join("/");
                let accepted = filters
                    .lock()
                    .expect("consumer filter lock poisoned")
                    .iter()
                    .any(|f| f.stream == *stream && f.pattern.is_match(&subject));
                if !accepted {
                    return None;
                }
                Some(InboundEnvelope {
                    delivery: Delivery::Stream,
                    sender: sender.to_string(),
                    subject,
                    payload: payload.to_vec(),
                })
            }
            _ => {
                debug!(topic, "ignoring publish on unrecognized topic shape");
                None
            }
        }
    }

    /// Drive the rumqttc event loop, forwarding publishes as envelopes.
    /// Exits on connection error; dropping the inbound sender lets the
    /// agent observe the loss through `recv()` returning `None`.
    fn spawn_event_loop(
        mut event_loop: EventLoop,
        identity: String,
        filters: Arc<Mutex<Vec<ConsumerFilter>>>,
        inbound_tx: mpsc::Sender<InboundEnvelope>,
        state_tx: watch::Sender<ConnState>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let _ = state_tx.send(ConnState::Connected);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = String::from_utf8_lossy(&publish.topic).to_string();
                        if let Some(envelope) = Self::route_publish(
                            &identity,
                            &filters,
                            &topic,
                            &publish.payload,
                        ) {
                            if inbound_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect(_))) => {
                        let _ = state_tx.send(ConnState::Disconnected(
                            "disconnected by broker".to_string(),
                        ));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT event loop error");
                        let _ = state_tx.send(ConnState::Disconnected(e.to_string()));
                        break;
                    }
                }
            }
            debug!(%identity, "MQTT event loop stopped");
        })
    }

    /// Wait until the event loop reports ConnAck or failure.
    async fn wait_for_connack(
        mut state_rx: watch::Receiver<ConnState>,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let wait = async {
            loop {
                match state_rx.borrow().clone() {
                    ConnState::Connected => return Ok(()),
                    ConnState::Disconnected(reason) => {
                        return Err(BrokerError::ConnectionFailed(reason.into()));
                    }
                    ConnState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(BrokerError::ConnectionFailed(
                        "event loop ended before ConnAck".into(),
                    ));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::ConnectTimeout(timeout)),
        }
    }

    fn connected_client(&self) -> Result<&AsyncClient, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.client.as_ref().ok_or(BrokerError::NotConnected)
    }
}

impl Default for MqttBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn connect(
        &mut self,
        endpoint: &str,
        timeout: Duration,
        identity: &str,
    ) -> Result<(), BrokerError> {
        self.disconnect().await;

        let options = Self::configure_options(endpoint, identity)?;
        let (client, event_loop) = AsyncClient::new(options, 10);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnState::Connecting);
        self.filters.lock().expect("consumer filter lock poisoned").clear();

        let handle = Self::spawn_event_loop(
            event_loop,
            identity.to_string(),
            self.filters.clone(),
            inbound_tx,
            state_tx,
        );

        if let Err(e) = Self::wait_for_connack(state_rx.clone(), timeout).await {
            handle.abort();
            return Err(e);
        }

        // Holding an identity means listening on its mailbox
        if let Err(e) = client
            .subscribe(format!("zm/mailbox/{identity}/#"), QoS::AtLeastOnce)
            .await
        {
            // Tear the half-open connection down; nothing owns it yet
            let _ = client.disconnect().await;
            handle.abort();
            return Err(BrokerError::ConnectionFailed(Box::new(e)));
        }

        self.identity = identity.to_string();
        self.client = Some(client);
        self.inbound_rx = Some(inbound_rx);
        self.event_loop_handle = Some(handle);
        self.state_rx = Some(state_rx);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect().await;
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.inbound_rx = None;
        self.state_rx = None;
        self.producer_stream = None;
        self.filters.lock().expect("consumer filter lock poisoned").clear();
    }

    async fn set_producer(&mut self, stream: &str) -> Result<(), BrokerError> {
        self.connected_client()?;
        // MQTT brokers need no producer declaration; the stream becomes the
        // topic prefix for outbound publishes.
        self.producer_stream = Some(stream.to_string());
        Ok(())
    }

    async fn set_consumer(&mut self, stream: &str, pattern: &str) -> Result<(), BrokerError> {
        let client = self.connected_client()?;

        let compiled = Regex::new(pattern)
            .map_err(|e| BrokerError::BindRejected(format!("bad subject pattern: {e}")))?;

        client
            .subscribe(format!("zm/stream/{stream}/#"), QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::BindRejected(e.to_string()))?;

        self.filters
            .lock()
            .expect("consumer filter lock poisoned")
            .push(ConsumerFilter {
                stream: stream.to_string(),
                pattern: compiled,
            });
        Ok(())
    }

    async fn recv(&mut self) -> Option<InboundEnvelope> {
        match self.inbound_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.state_rx.as_ref().map(|rx| rx.borrow().clone()),
            Some(ConnState::Connected)
        )
    }
}

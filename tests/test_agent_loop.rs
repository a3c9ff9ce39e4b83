//! End-to-end tests for the device agent event loop
//!
//! Drives a spawned agent through the string-framed control channel against
//! a mock broker, covering session establishment, configuration
//! replacement, dispatch resilience, and termination teardown.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use zm_device::agent::DeviceAgent;
use zm_device::protocol::{DeviceReport, ZmMessage};
use zm_device::testing::mocks::MockBroker;
use zm_device::transport::{Delivery, InboundEnvelope};

const CONFIG: &str = r#"
[server]
name = "dev1"

[malamute]
endpoint = "tcp://x"
producer = "alerts"

[malamute.consumer]
cmds = "topic.*"
"#;

/// Poll a recorded-call handle until it reaches the expected length.
async fn wait_for_len<T>(handle: &Arc<Mutex<Vec<T>>>, len: usize) {
    timeout(Duration::from_secs(5), async {
        loop {
            if handle.lock().unwrap().len() >= len {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("recorded calls never reached expected length");
}

fn stream_envelope(payload: Vec<u8>) -> InboundEnvelope {
    InboundEnvelope {
        delivery: Delivery::Stream,
        sender: "sensor-7".to_string(),
        subject: "topic.report".to_string(),
        payload,
    }
}

fn device_payload() -> Vec<u8> {
    ZmMessage::Device(DeviceReport {
        device: "sensor-7".to_string(),
        time: Utc::now(),
        ttl_ms: 30_000,
        ext: HashMap::new(),
    })
    .encode()
}

#[tokio::test]
async fn test_configure_then_start_establishes_session() {
    let broker = MockBroker::new();
    let connects = broker.connect_attempts.clone();
    let producers = broker.producer_binds.clone();
    let consumers = broker.consumer_binds.clone();

    let (agent, mut handle) = DeviceAgent::new(broker);
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    handle.configure(CONFIG).await;
    handle.start().await;
    handle.terminate().await;
    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

    // Exactly one connect to the configured endpoint under the configured
    // identity, one producer binding, one consumer binding
    assert_eq!(
        connects.lock().unwrap().as_slice(),
        &[("tcp://x".to_string(), "dev1".to_string())]
    );
    assert_eq!(producers.lock().unwrap().as_slice(), &["alerts".to_string()]);
    assert_eq!(
        consumers.lock().unwrap().as_slice(),
        &[("cmds".to_string(), "topic.*".to_string())]
    );
}

#[tokio::test]
async fn test_start_without_config_makes_no_connect_attempt() {
    let broker = MockBroker::new();
    let connects = broker.connect_attempts.clone();

    let (agent, mut handle) = DeviceAgent::new(broker);
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    handle.start().await;
    // The loop stays alive after the failed START and still honors $TERM
    handle.terminate().await;
    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

    assert!(connects.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_config_replacement_keeps_previous_tree_active() {
    let broker = MockBroker::new();
    let connects = broker.connect_attempts.clone();

    let (agent, mut handle) = DeviceAgent::new(broker);
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    handle.configure(CONFIG).await;
    handle.configure("this is { not : toml").await;
    handle.start().await;
    handle.terminate().await;
    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

    // START after the rejected replacement still connects to the endpoint
    // from the previously loaded tree
    assert_eq!(
        connects.lock().unwrap().as_slice(),
        &[("tcp://x".to_string(), "dev1".to_string())]
    );
}

#[tokio::test]
async fn test_malformed_envelope_does_not_terminate_loop() {
    let broker = MockBroker::new();
    let connects = broker.connect_attempts.clone();
    let inject = broker.sender();

    let (agent, mut handle) = DeviceAgent::new(broker);
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    handle.verbose().await;
    handle.configure(CONFIG).await;
    handle.start().await;
    wait_for_len(&connects, 1).await;

    // A broken message is dropped; the next wait cycle still services
    // both the broker and the control channel
    inject.send(stream_envelope(b"garbage".to_vec())).unwrap();
    inject.send(stream_envelope(device_payload())).unwrap();

    // Give the loop a cycle to drain the injected envelopes before $TERM
    sleep(Duration::from_millis(50)).await;
    handle.terminate().await;
    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_terminate_tears_down_active_session() {
    let broker = MockBroker::new();
    let connects = broker.connect_attempts.clone();
    let disconnects = broker.disconnects.clone();

    let (agent, mut handle) = DeviceAgent::new(broker);
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    handle.configure(CONFIG).await;
    handle.start().await;
    wait_for_len(&connects, 1).await;

    handle.terminate().await;
    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

    // Session release ran during teardown
    assert!(*disconnects.lock().unwrap() >= 1);
}

#[tokio::test]
async fn test_stop_then_start_reuses_last_configuration() {
    let broker = MockBroker::new();
    let connects = broker.connect_attempts.clone();

    let (agent, mut handle) = DeviceAgent::new(broker);
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    handle.configure(CONFIG).await;
    handle.start().await;
    handle.stop().await;
    handle.start().await;
    handle.terminate().await;
    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

    let attempts = connects.lock().unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|(e, i)| e == "tcp://x" && i == "dev1"));
}

#[tokio::test]
async fn test_dropping_handle_terminates_agent() {
    let broker = MockBroker::new();

    let (agent, mut handle) = DeviceAgent::new(broker);
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    drop(handle);

    timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();
}

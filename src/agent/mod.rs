//! Device agent event loop and control handling
//!
//! [`DeviceAgent`] is the top-level state holder: it exclusively owns the
//! configuration tree, the broker session, and the dispatcher, and drives
//! the run-until-terminated cycle. All state mutation happens inside the
//! loop's synchronous dispatch; there is no internal parallelism and no
//! locking.

use crate::config::ConfigTree;
use crate::session::BrokerSession;
use crate::transport::BrokerClient;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub mod control;
pub mod dispatch;

pub use control::ControlCommand;
pub use dispatch::{DispatchOutcome, Dispatcher};

const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// Owner-side handle to a running agent.
///
/// Commands are fire-and-forget: nothing comes back on the channel. The
/// only signal emitted by the agent is the one-time readiness notification
/// awaited through [`ControlHandle::ready`].
pub struct ControlHandle {
    commands: mpsc::Sender<String>,
    ready: Option<oneshot::Receiver<()>>,
}

impl ControlHandle {
    /// Wait for the agent loop to signal that it is running. Resolves
    /// immediately on subsequent calls.
    pub async fn ready(&mut self) {
        if let Some(rx) = self.ready.take() {
            let _ = rx.await;
        }
    }

    pub async fn start(&self) {
        self.send("START".to_string()).await;
    }

    pub async fn stop(&self) {
        self.send("STOP".to_string()).await;
    }

    pub async fn verbose(&self) {
        self.send("VERBOSE".to_string()).await;
    }

    pub async fn configure(&self, config_text: &str) {
        self.send(format!("CONFIG {config_text}")).await;
    }

    pub async fn terminate(&self) {
        self.send("$TERM".to_string()).await;
    }

    async fn send(&self, line: String) {
        // Fire-and-forget; a send failure means the agent already exited
        let _ = self.commands.send(line).await;
    }
}

/// The device agent: event loop and state holder.
pub struct DeviceAgent<B: BrokerClient> {
    control_rx: mpsc::Receiver<String>,
    ready_tx: Option<oneshot::Sender<()>>,
    session: BrokerSession<B>,
    dispatcher: Dispatcher,
    config: Option<ConfigTree>,
    verbose: bool,
    terminated: bool,
}

impl<B: BrokerClient> DeviceAgent<B> {
    /// Create an agent around the given broker client, returning the agent
    /// and the owner's control handle.
    pub fn new(client: B) -> (Self, ControlHandle) {
        let (commands, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        let agent = Self {
            control_rx,
            ready_tx: Some(ready_tx),
            session: BrokerSession::new(client),
            dispatcher: Dispatcher,
            config: None,
            verbose: false,
            terminated: false,
        };
        let handle = ControlHandle {
            commands,
            ready: Some(ready_rx),
        };
        (agent, handle)
    }

    /// Run until terminated.
    ///
    /// Blocks on whichever of the control channel and the broker connection
    /// is ready; when both are, control commands are serviced first. Each
    /// event runs to completion before the next wait. On exit the broker
    /// session and the configuration are released unconditionally.
    pub async fn run(mut self) {
        if let Some(ready) = self.ready_tx.take() {
            let _ = ready.send(());
        }
        info!("device agent running");

        while !self.terminated {
            tokio::select! {
                biased;

                line = self.control_rx.recv() => match line {
                    Some(line) => self.handle_control(&line).await,
                    // Owner dropped the handle; treat like $TERM
                    None => self.terminated = true,
                },

                envelope = self.session.recv(), if self.session.is_connected() => {
                    match envelope {
                        Some(envelope) => {
                            self.dispatcher.dispatch(envelope, self.verbose);
                        }
                        None => {
                            warn!("broker connection lost");
                            self.session.stop().await;
                        }
                    }
                }
            }
        }

        // Idempotent teardown: both are no-ops when already absent
        self.session.stop().await;
        self.config = None;
        info!("device agent terminated");
    }

    /// Interpret one control channel command. Panics on an unrecognized
    /// verb; everything else is non-fatal.
    async fn handle_control(&mut self, line: &str) {
        match ControlCommand::parse(line) {
            ControlCommand::Start => {
                if let Err(e) = self.session.start(self.config.as_ref()).await {
                    warn!(error = %e, "broker session start failed");
                }
            }
            ControlCommand::Stop => {
                self.session.stop().await;
                debug!("broker session stopped");
            }
            ControlCommand::Verbose => {
                self.verbose = true;
            }
            ControlCommand::Config(Some(text)) => match ConfigTree::parse(&text) {
                Ok(tree) => {
                    self.config = Some(tree);
                    debug!("configuration replaced");
                }
                Err(e) => {
                    warn!(error = %e, "can't load configuration from string");
                }
            },
            ControlCommand::Config(None) => {
                warn!("CONFIG command without configuration text");
            }
            ControlCommand::Terminate => {
                self.terminated = true;
            }
        }
    }
}

//! Inbound envelope decoding and routing
//!
//! One envelope in, one outcome out. Decode failures are non-fatal: the
//! broken message is dropped with no retry and no signal back to the sender;
//! delivery reliability is the broker's concern, not this agent's.

use crate::protocol::{MessageKind, ZmMessage};
use crate::transport::{Delivery, InboundEnvelope};
use tracing::{info, warn};

/// Result of dispatching one inbound envelope
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Payload did not decode; message dropped
    DecodeFailed,
    /// Direct delivery, decoded and logged
    Mailbox(ZmMessage),
    /// Stream delivery carrying an accepted device payload
    Device(ZmMessage),
    /// Stream delivery with a non-device discriminator; message dropped
    IgnoredKind(MessageKind),
}

/// Decodes inbound broker envelopes and routes them by delivery kind and
/// payload discriminator.
#[derive(Debug, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn dispatch(&self, envelope: InboundEnvelope, verbose: bool) -> DispatchOutcome {
        let message = match ZmMessage::decode(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                if verbose {
                    warn!(
                        sender = %envelope.sender,
                        subject = %envelope.subject,
                        error = %e,
                        "can't read message"
                    );
                }
                return DispatchOutcome::DecodeFailed;
            }
        };

        match envelope.delivery {
            Delivery::Mailbox => self.on_mailbox(&envelope, message),
            Delivery::Stream => self.on_stream(&envelope, message, verbose),
        }
    }

    fn on_mailbox(&self, envelope: &InboundEnvelope, message: ZmMessage) -> DispatchOutcome {
        info!(
            sender = %envelope.sender,
            subject = %envelope.subject,
            message = ?message,
            "mailbox delivery"
        );
        DispatchOutcome::Mailbox(message)
    }

    fn on_stream(
        &self,
        envelope: &InboundEnvelope,
        message: ZmMessage,
        verbose: bool,
    ) -> DispatchOutcome {
        info!(
            sender = %envelope.sender,
            subject = %envelope.subject,
            message = ?message,
            "stream delivery"
        );

        if message.kind() != MessageKind::Device {
            if verbose {
                warn!(
                    sender = %envelope.sender,
                    subject = %envelope.subject,
                    kind = %message.kind(),
                    "message is not DEVICE"
                );
            }
            return DispatchOutcome::IgnoredKind(message.kind());
        }

        // Accepted device payloads are logged only; request handling hooks
        // in here once defined.
        DispatchOutcome::Device(message)
    }
}

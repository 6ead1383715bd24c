//! The transport abstraction (§6): the only surface this crate requires of a
//! concrete broker client library.
//!
//! Concrete queue-based and log-based broker bindings are external
//! collaborators (§1) and are not implemented here. [`memory`] is the one
//! exception: a purely in-process transport used by this crate's own tests and
//! by the bundled demo binary, standing in for a real broker.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error as ThisError;

use crate::properties::Properties;

pub mod memory;

/// A named destination (queue or topic) on a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination(pub String);

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a session acknowledges messages automatically or under an explicit
/// transaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    AutoAck,
    Transacted,
}

/// Delivery durability for a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Persistent,
    NonPersistent,
}

/// Per-send delivery options (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    pub time_to_live_millis: Option<u64>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::NonPersistent,
            priority: 4,
            time_to_live_millis: None,
        }
    }
}

/// The framed unit actually handed to and received from a [`Connection`].
///
/// This is the transport-level twin of [`Envelope`](crate::envelope::Envelope):
/// the envelope layer encodes into this, and decodes out of this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub properties: Properties,
    pub reply_to: Option<Destination>,
    pub payload: Vec<u8>,
}

impl TransportMessage {
    pub fn new(properties: Properties, payload: Vec<u8>) -> Self {
        Self {
            properties,
            reply_to: None,
            payload,
        }
    }
}

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("connection {0:?} is not alive")]
    ConnectionLost(String),
    #[error("failed to resolve destination {0:?}")]
    DestinationNotFound(Destination),
    #[error("send refused: {0}")]
    SendRefused(String),
    #[error("receiver closed")]
    ReceiverClosed,
}

/// A logical connection to a broker: the entry point for resolving
/// destinations and creating senders/receivers bound to it.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// A human-readable name for logging (the "named endpoint" of §6).
    fn name(&self) -> &str;

    /// Whether this connection still believes it is usable. A `false` here is
    /// what drives [`crate::binding::SessionBinding::invalidate`].
    fn is_alive(&self) -> bool;

    /// Looks up a destination by name.
    async fn destination(&self, name: &str) -> Result<Destination, TransportError>;

    /// Creates a destination scoped to this connection's lifetime, used for a
    /// client's single shared reply-to destination.
    async fn temporary_destination(&self) -> Result<Destination, TransportError>;

    /// Creates a sender bound to `destination`.
    async fn sender(&self, destination: &Destination) -> Result<Box<dyn Sender>, TransportError>;

    /// Creates a receiver bound to `destination`, under the given ack mode.
    async fn receiver(
        &self,
        destination: &Destination,
        ack_mode: AckMode,
    ) -> Result<Box<dyn Receiver>, TransportError>;
}

/// A handle that can send [`TransportMessage`]s to the destination it was
/// created for.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(
        &self,
        message: TransportMessage,
        options: SendOptions,
    ) -> Result<(), TransportError>;
}

/// A handle that yields [`TransportMessage`]s delivered to the destination it
/// was created for. `recv` is the pull-based equivalent of the "message
/// listener callback" named in §6; the receiver-thread loop described in §5
/// is simply a task that calls `recv` in a loop.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn recv(&mut self) -> Result<TransportMessage, TransportError>;
}

//! An in-process [`Connection`] backed by `tokio::sync::mpsc` channels.
//!
//! This is not part of the specified transport surface (§1 treats concrete
//! broker bindings as external collaborators); it exists purely so this
//! crate's own integration tests and the bundled demo binary have something
//! to run against in place of a real broker.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{AckMode, Connection, Destination, Receiver, Sender, TransportError, TransportMessage};

type Mailbox = mpsc::UnboundedSender<TransportMessage>;

/// A shared in-process broker: a registry of named mailboxes that any number
/// of [`MemoryConnection`]s can be pointed at, standing in for a real broker
/// cluster.
#[derive(Debug, Default, Clone)]
pub struct MemoryBroker {
    mailboxes: Arc<DashMap<String, Mailbox>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a connection to this broker under the given name.
    pub fn connect(&self, name: impl Into<String>) -> MemoryConnection {
        MemoryConnection {
            name: name.into(),
            mailboxes: self.mailboxes.clone(),
            alive: Arc::new(AtomicBool::new(true)),
            next_temp: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// A connection to a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    name: String,
    mailboxes: Arc<DashMap<String, Mailbox>>,
    alive: Arc<AtomicBool>,
    next_temp: Arc<AtomicU64>,
}

impl MemoryConnection {
    /// Simulates a broker disconnect: marks the connection dead. Existing
    /// senders and receivers keep whatever mailbox handles they already hold
    /// (mirroring a real client library, which does not retroactively
    /// invalidate handles already in a caller's hands), but `is_alive` flips
    /// so a [`crate::binding::SessionBinding`] notices and reconnects.
    pub fn sever(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Reverses [`sever`](Self::sever), simulating the connection coming back.
    pub fn restore(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn destination(&self, name: &str) -> Result<Destination, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionLost(self.name.clone()));
        }
        Ok(Destination(name.to_owned()))
    }

    async fn temporary_destination(&self) -> Result<Destination, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionLost(self.name.clone()));
        }
        let id = self.next_temp.fetch_add(1, Ordering::SeqCst);
        Ok(Destination(format!("{}-temp-{id}", self.name)))
    }

    async fn sender(&self, destination: &Destination) -> Result<Box<dyn Sender>, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionLost(self.name.clone()));
        }
        Ok(Box::new(MemorySender {
            mailboxes: self.mailboxes.clone(),
            destination: destination.clone(),
        }))
    }

    async fn receiver(
        &self,
        destination: &Destination,
        _ack_mode: AckMode,
    ) -> Result<Box<dyn Receiver>, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ConnectionLost(self.name.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(destination.0.clone(), tx);
        Ok(Box::new(MemoryReceiver { inner: rx }))
    }
}

struct MemorySender {
    mailboxes: Arc<DashMap<String, Mailbox>>,
    destination: Destination,
}

#[async_trait]
impl Sender for MemorySender {
    async fn send(
        &self,
        message: TransportMessage,
        _options: super::SendOptions,
    ) -> Result<(), TransportError> {
        let mailbox = self
            .mailboxes
            .get(&self.destination.0)
            .ok_or_else(|| TransportError::DestinationNotFound(self.destination.clone()))?;
        mailbox
            .send(message)
            .map_err(|_| TransportError::SendRefused(self.destination.0.clone()))
    }
}

struct MemoryReceiver {
    inner: mpsc::UnboundedReceiver<TransportMessage>,
}

#[async_trait]
impl Receiver for MemoryReceiver {
    async fn recv(&mut self) -> Result<TransportMessage, TransportError> {
        self.inner.recv().await.ok_or(TransportError::ReceiverClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Properties;

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let broker = MemoryBroker::new();
        let conn = broker.connect("test");
        let dest = conn.destination("inbox").await.unwrap();

        let mut receiver = conn.receiver(&dest, AckMode::AutoAck).await.unwrap();
        let sender = conn.sender(&dest).await.unwrap();

        sender
            .send(
                TransportMessage::new(Properties::new(), b"hello".to_vec()),
                super::super::SendOptions::default(),
            )
            .await
            .unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.payload, b"hello");
    }

    #[tokio::test]
    async fn send_to_unknown_destination_fails() {
        let broker = MemoryBroker::new();
        let conn = broker.connect("test");
        let dest = conn.destination("nobody-home").await.unwrap();
        let sender = conn.sender(&dest).await.unwrap();

        let err = sender
            .send(
                TransportMessage::new(Properties::new(), vec![]),
                super::super::SendOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::DestinationNotFound(_)));
    }

    #[tokio::test]
    async fn severed_connection_refuses_new_resources() {
        let broker = MemoryBroker::new();
        let conn = broker.connect("test");
        conn.sever();

        assert!(!conn.is_alive());
        assert!(conn.destination("inbox").await.is_err());

        conn.restore();
        assert!(conn.destination("inbox").await.is_ok());
    }
}

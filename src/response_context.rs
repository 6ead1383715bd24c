//! The server-side per-call handle passed to a [`RequestSink`](crate::server_proxy::RequestSink)
//! (§4.6, §4.7): the place a sink calls to stream responses, extend its
//! deadline, signal completion, or report failure.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tracing::{event, Level};

use crate::{
    call_id::{CallId, ResponseId},
    envelope::{self, Envelope, MessageType, ProtocolVersion},
    error::RemoteException,
    frag::{digest, emit, split},
    time::SharedTimeSource,
    transport::{Destination, Sender, TransportError},
};

/// The handle a user-supplied [`RequestSink`](crate::server_proxy::RequestSink)
/// uses to stream responses back to the client that issued a call.
///
/// `endOfStream` and `notifyError` are terminal and mutually exclusive: the
/// first one observed wins and every later call is a no-op (§3).
pub struct ResponseContext {
    call_id: CallId,
    reply_to: Destination,
    version: ProtocolVersion,
    sender: Arc<dyn Sender>,
    max_message_size: usize,
    clock: SharedTimeSource,
    closed: AtomicBool,
    last_sent_millis: AtomicU64,
}

impl ResponseContext {
    pub fn new(
        call_id: CallId,
        reply_to: Destination,
        version: ProtocolVersion,
        sender: Arc<dyn Sender>,
        max_message_size: usize,
        clock: SharedTimeSource,
    ) -> Self {
        Self {
            call_id,
            reply_to,
            version,
            sender,
            max_message_size,
            last_sent_millis: AtomicU64::new(clock.now_millis()),
            clock,
            closed: AtomicBool::new(false),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// The destination responses on this call are sent to — the signal's
    /// `reply_to`, which the context's `sender` is bound to.
    pub fn reply_to(&self) -> &Destination {
        &self.reply_to
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The wall-clock time (millis) this context last put anything on the
    /// wire, used to suppress a watchdog keep-alive immediately after a real
    /// response (§4.6).
    pub fn last_sent_millis(&self) -> u64 {
        self.last_sent_millis.load(Ordering::SeqCst)
    }

    fn mark_sent(&self) {
        self.last_sent_millis.store(self.clock.now_millis(), Ordering::SeqCst);
    }

    /// Sends `payload` as a response. Fragments under a fresh response id
    /// when it exceeds the configured maximum message size. Returns `false`
    /// if the context is already closed or the send failed.
    pub async fn add_response(&self, payload: Vec<u8>) -> bool {
        if self.is_closed() {
            return false;
        }
        let result = if payload.len() <= self.max_message_size {
            let envelope = Envelope::new(self.version, MessageType::SignalResponse, self.call_id)
                .with_response_id(ResponseId::new())
                .with_payload(payload);
            self.sender
                .send(
                    crate::envelope::encode(&envelope),
                    crate::transport::SendOptions::default(),
                )
                .await
        } else {
            let slices = split(&payload, self.max_message_size);
            emit(
                &*self.sender,
                self.version,
                self.call_id,
                ResponseId::new(),
                None,
                &slices,
            )
            .await
        };

        match result {
            Ok(()) => {
                self.mark_sent();
                true
            }
            Err(err) => {
                event!(target: "RESPONSE_SEND_FAILED", Level::WARN, call_id = %self.call_id, reply_to = %self.reply_to, error = %err);
                self.closed.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Extends the client's deadline by sending an `ExtendWait` envelope
    /// carrying `until_millis`.
    pub async fn keep_alive(&self, until_millis: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut envelope = Envelope::new(self.version, MessageType::ExtendWait, self.call_id);
        envelope.properties.set(envelope::wire::REQ_TIMEOUT, until_millis as i64);
        let sent = self
            .sender
            .send(
                crate::envelope::encode(&envelope),
                crate::transport::SendOptions::default(),
            )
            .await;
        if sent.is_ok() {
            self.mark_sent();
        }
        sent.is_ok()
    }

    /// Signals the call's stream is complete. A no-op if already closed.
    pub async fn end_of_stream(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let envelope = Envelope::new(self.version, MessageType::StreamClosed, self.call_id);
        let _ = self
            .sender
            .send(
                crate::envelope::encode(&envelope),
                crate::transport::SendOptions::default(),
            )
            .await;
    }

    /// Reports a terminal error to the caller. A no-op if already closed.
    ///
    /// The error is carried as a serialized [`RemoteException`] payload
    /// (§4.1's V2 "exception carriage"), not as a raw message string.
    pub async fn notify_error(&self, kind: impl Into<String>, message: impl Into<String>) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let exception = RemoteException::new(kind, message);
        let envelope = Envelope::new(self.version, MessageType::Exception, self.call_id)
            .with_payload(exception.encode());
        let _ = self
            .sender
            .send(
                crate::envelope::encode(&envelope),
                crate::transport::SendOptions::default(),
            )
            .await;
    }

    /// Reports a transport-level failure as a terminal error without putting
    /// anything further on the wire (the send already failed).
    pub fn fail_terminally(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

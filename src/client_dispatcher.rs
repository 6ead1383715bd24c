//! The client-side multiplexer (§4.5): one receiver on a single reply
//! destination serving an unbounded number of concurrent [`RequestHandler`]s.

use std::{sync::Arc, time::Duration};

use tracing::{event, Level};

use crate::{
    call_id::CallId,
    envelope::{self, Envelope, MessageType},
    error::RemoteException,
    frag::FragmentAssembler,
    logging::{call_registered_event, call_unregistered_event, fragment_rejected_event},
    request_handler::RequestHandler,
};

struct Registration {
    handler: Arc<RequestHandler>,
    fragments: std::sync::Mutex<FragmentAssembler>,
}

/// Routes decoded envelopes to the [`RequestHandler`] matching their call id,
/// and periodically reaps handlers that have closed.
#[derive(Default)]
pub struct ClientDispatcher {
    handlers: crate::FxDashMap<CallId, Registration>,
}

impl ClientDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `handler` by its call id so subsequent envelopes route to it.
    pub fn register(&self, handler: Arc<RequestHandler>) {
        let call_id = handler.call_id();
        call_registered_event(call_id, handler.allow_keep_alive());
        self.handlers.insert(
            call_id,
            Registration {
                handler,
                fragments: std::sync::Mutex::new(FragmentAssembler::new()),
            },
        );
    }

    /// Removes the handler for `call_id`, if any, and fires its close
    /// listeners.
    pub fn unregister(&self, call_id: CallId) {
        if self.handlers.remove(&call_id).is_some() {
            call_unregistered_event(call_id);
        }
    }

    /// Routes one decoded envelope to its handler by call id. Envelopes for
    /// an unknown or already-closed call id are silently dropped, matching
    /// the "protocol errors never fail the session" policy (§7).
    pub fn on_envelope(&self, envelope: Envelope) {
        let Some(entry) = self.handlers.get(&envelope.call_id) else {
            event!(target: "UNROUTABLE_ENVELOPE", Level::DEBUG, call_id = %envelope.call_id);
            return;
        };
        if entry.handler.is_closed() {
            return;
        }

        match envelope.message_type {
            MessageType::SignalResponse => {
                entry.handler.add_response(envelope.payload);
            }
            MessageType::SignalFragment => {
                if let Some(response_id) = envelope.response_id {
                    let index = envelope
                        .properties
                        .get_int(envelope::wire::FRAGMENT_INDEX)
                        .unwrap_or_default();
                    entry
                        .fragments
                        .lock()
                        .unwrap()
                        .add_fragment(response_id, index as u32, envelope.payload);
                }
            }
            MessageType::EndOfFragmentedMessage => {
                if let Some(response_id) = envelope.response_id {
                    let total = envelope
                        .properties
                        .get_int(envelope::wire::FRAGMENTS_TOTAL)
                        .unwrap_or_default();
                    let Ok(digest) = envelope
                        .properties
                        .get_text(envelope::wire::DATA_CHECKSUM_MD5)
                    else {
                        return;
                    };
                    let assembled = entry.fragments.lock().unwrap().add_terminator(
                        response_id,
                        total as u32,
                        digest.to_owned(),
                    );
                    match assembled {
                        Ok(payload) => {
                            entry.handler.add_response(payload);
                        }
                        Err(err) => {
                            fragment_rejected_event(envelope.call_id, &err.to_string());
                        }
                    }
                }
            }
            MessageType::ExtendWait => {
                if let Ok(until) = envelope.properties.get_int(envelope::wire::REQ_TIMEOUT) {
                    entry.handler.keep_alive(until as u64);
                }
            }
            MessageType::StreamClosed => {
                entry.handler.end_of_stream();
            }
            MessageType::Exception => {
                let exception = RemoteException::decode(&envelope.payload);
                entry.handler.notify_error(exception.into());
            }
            MessageType::Signal | MessageType::ChannelRequest | MessageType::ChannelSetup => {
                // not meaningful on the client's reply destination; ignore.
            }
        }
    }

    /// Unregisters every handler that has closed. Intended to be driven by a
    /// periodic timer task alongside the receiver loop.
    pub fn reap(&self) {
        let expired: Vec<CallId> = self
            .handlers
            .iter()
            .filter(|entry| entry.handler.is_closed())
            .map(|entry| *entry.key())
            .collect();
        for call_id in expired {
            self.unregister(call_id);
        }
    }

    /// Runs [`reap`](Self::reap) every `interval` until `shutdown` fires.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.reap(),
                _ = shutdown.recv() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        call_id::ResponseId,
        envelope::ProtocolVersion,
        frag::{digest, split},
        time::wall_clock,
    };

    fn signal_response(call_id: CallId, payload: &[u8]) -> Envelope {
        Envelope::new(ProtocolVersion::V2, MessageType::SignalResponse, call_id)
            .with_payload(payload.to_vec())
    }

    #[tokio::test]
    async fn routes_response_to_registered_handler() {
        let dispatcher = ClientDispatcher::new();
        let call_id = CallId::new();
        let handler = Arc::new(RequestHandler::new(true, call_id, 1_000, wall_clock()));
        dispatcher.register(handler.clone());

        dispatcher.on_envelope(signal_response(call_id, b"r0"));
        assert_eq!(handler.get_responses_no_wait().unwrap(), vec![b"r0".to_vec()]);
    }

    #[tokio::test]
    async fn envelope_for_unknown_call_id_is_dropped() {
        let dispatcher = ClientDispatcher::new();
        // no panic, no-op
        dispatcher.on_envelope(signal_response(CallId::new(), b"orphan"));
    }

    #[tokio::test]
    async fn reassembles_fragmented_response() {
        let dispatcher = ClientDispatcher::new();
        let call_id = CallId::new();
        let handler = Arc::new(RequestHandler::new(true, call_id, 1_000, wall_clock()));
        dispatcher.register(handler.clone());

        let response_id = ResponseId::new();
        let payload = b"a response long enough to need splitting";
        let slices = split(payload, 8);
        let expected_digest = digest(&slices);

        for (index, slice) in slices.iter().enumerate() {
            let mut envelope = Envelope::new(ProtocolVersion::V2, MessageType::SignalFragment, call_id)
                .with_response_id(response_id)
                .with_payload(slice.to_vec());
            envelope.properties.set(envelope::wire::FRAGMENT_INDEX, index as i64);
            dispatcher.on_envelope(envelope);
        }

        let mut terminator = Envelope::new(
            ProtocolVersion::V2,
            MessageType::EndOfFragmentedMessage,
            call_id,
        )
        .with_response_id(response_id);
        terminator
            .properties
            .set(envelope::wire::FRAGMENTS_TOTAL, slices.len() as i64)
            .set(envelope::wire::DATA_CHECKSUM_MD5, expected_digest);
        dispatcher.on_envelope(terminator);

        assert_eq!(handler.get_responses_no_wait().unwrap(), vec![payload.to_vec()]);
    }

    #[tokio::test]
    async fn reap_unregisters_closed_handlers() {
        let dispatcher = ClientDispatcher::new();
        let call_id = CallId::new();
        let handler = Arc::new(RequestHandler::new(true, call_id, 1_000, wall_clock()));
        dispatcher.register(handler.clone());
        handler.end_of_stream();

        dispatcher.reap();
        assert!(dispatcher.handlers.get(&call_id).is_none());
    }
}

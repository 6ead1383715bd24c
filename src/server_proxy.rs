//! The server-side dispatcher (§4.6): decodes inbound signals, invokes the
//! user-supplied [`RequestSink`], and runs the keep-alive watchdog and
//! channel-upload (large-payload) path.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{event, Level};

use crate::{
    binding::SessionBinding,
    call_id::CallId,
    envelope::{self, Envelope, MessageType},
    frag::FragmentAssembler,
    response_context::ResponseContext,
    time::SharedTimeSource,
    transport::{AckMode, Connection, TransportError},
};

/// The user-supplied processor for inbound signals. Must return promptly;
/// long-running work should be done asynchronously using `ctx` (§6).
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn signal(&self, payload: Vec<u8>, ctx: Arc<ResponseContext>, max_wait_millis: u64);
}

/// Tuning knobs a [`ServerProxy`] needs beyond the destination and sink
/// (mirrors the relevant subset of [`crate::config::ServerConfig`]).
#[derive(Debug, Clone)]
pub struct ServerProxyOptions {
    pub max_message_size: usize,
    pub keep_alive_interval: Duration,
    pub channel_inactivity_timeout: Duration,
}

impl Default for ServerProxyOptions {
    fn default() -> Self {
        Self {
            max_message_size: 1_048_576,
            keep_alive_interval: Duration::from_secs(10),
            channel_inactivity_timeout: Duration::from_secs(30),
        }
    }
}

struct ChannelUpload {
    fragments: std::sync::Mutex<FragmentAssembler>,
    started: tokio::time::Instant,
}

/// Subscribes to a server destination and drives signals into a
/// [`RequestSink`], handling fragmentation, the keep-alive watchdog, and
/// channel-upload mode for oversized requests.
pub struct ServerProxy {
    binding: SessionBinding,
    sink: Arc<dyn RequestSink>,
    options: ServerProxyOptions,
    clock: SharedTimeSource,
    channel_uploads: crate::FxDashMap<CallId, ChannelUpload>,
}

impl ServerProxy {
    pub fn new(
        connections: Vec<Arc<dyn Connection>>,
        destination_name: impl Into<String>,
        sink: Arc<dyn RequestSink>,
        options: ServerProxyOptions,
        clock: SharedTimeSource,
    ) -> Self {
        Self {
            binding: SessionBinding::new(
                connections,
                destination_name,
                AckMode::AutoAck,
                Duration::ZERO,
            ),
            sink,
            options,
            clock,
            channel_uploads: crate::FxDashMap::default(),
        }
    }

    /// Runs the receive loop until `shutdown` fires. Reconnects the binding
    /// on transport failure per §4.3/§4.7.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            let receiver = match self.binding.get_receiver().await {
                Ok(receiver) => receiver,
                Err(err) => {
                    event!(target: "SERVER_RECONNECT", Level::WARN, error = %err);
                    self.binding.invalidate().await;
                    if self.binding.reconnect(30_000).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            tokio::select! {
                message = async { receiver.lock().await.recv().await } => {
                    match message {
                        Ok(message) => self.clone().handle_message(message).await,
                        Err(TransportError::ReceiverClosed) | Err(TransportError::ConnectionLost(_)) => {
                            self.binding.invalidate().await;
                            if self.binding.reconnect(30_000).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            event!(target: "SERVER_RECEIVE_ERROR", Level::WARN, error = %err);
                        }
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    async fn handle_message(self: Arc<Self>, message: crate::transport::TransportMessage) {
        let envelope = match envelope::decode(&message) {
            Ok(envelope) => envelope,
            Err(rejection) => {
                event!(target: "ENVELOPE_REJECTED", Level::DEBUG, error = %rejection);
                return;
            }
        };

        match envelope.message_type {
            MessageType::Signal => self.dispatch_signal(envelope).await,
            MessageType::ChannelRequest => self.start_channel_upload(envelope).await,
            MessageType::SignalFragment | MessageType::StreamClosed => {
                self.continue_channel_upload(envelope).await
            }
            _ => {}
        }
    }

    async fn dispatch_signal(self: Arc<Self>, envelope: Envelope) {
        let Some(reply_to) = envelope.reply_to.clone() else {
            event!(target: "SIGNAL_WITHOUT_REPLY_TO", Level::WARN, call_id = %envelope.call_id);
            return;
        };
        let deadline = envelope
            .properties
            .get_int(envelope::wire::REQ_TIMEOUT)
            .unwrap_or(0) as u64;
        let max_wait = deadline.saturating_sub(self.clock.now_millis());

        let connection = self.binding.current_connection().await;
        let Ok(sender) = connection.sender(&reply_to).await else {
            event!(target: "REPLY_SENDER_UNAVAILABLE", Level::WARN, call_id = %envelope.call_id);
            return;
        };
        let sender: Arc<dyn crate::transport::Sender> = Arc::from(sender);
        let ctx = Arc::new(ResponseContext::new(
            envelope.call_id,
            reply_to,
            envelope.version,
            sender,
            self.options.max_message_size,
            self.clock.clone(),
        ));

        self.clone().spawn_watchdog(ctx.clone());

        let sink = self.sink.clone();
        let payload = envelope.payload;
        tokio::spawn(async move {
            sink.signal(payload, ctx, max_wait).await;
        });
    }

    fn spawn_watchdog(self: Arc<Self>, ctx: Arc<ResponseContext>) {
        let interval = self.options.keep_alive_interval;
        let clock = self.clock.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if ctx.is_closed() {
                    return;
                }
                let since_last_send = clock.now_millis().saturating_sub(ctx.last_sent_millis());
                if since_last_send < interval.as_millis() as u64 {
                    continue;
                }
                let extended_deadline = clock.now_millis() + interval.as_millis() as u64;
                if !ctx.keep_alive(extended_deadline).await {
                    return;
                }
            }
        });
    }

    async fn start_channel_upload(&self, envelope: Envelope) {
        let Some(reply_to) = envelope.reply_to.clone() else {
            return;
        };
        let connection = self.binding.current_connection().await;
        let Ok(channel_destination) = connection.temporary_destination().await else {
            return;
        };
        let Ok(sender) = connection.sender(&reply_to).await else {
            return;
        };

        self.channel_uploads.insert(
            envelope.call_id,
            ChannelUpload {
                fragments: std::sync::Mutex::new(FragmentAssembler::new()),
                started: tokio::time::Instant::now(),
            },
        );

        let setup = Envelope::new(envelope.version, MessageType::ChannelSetup, envelope.call_id)
            .with_reply_to(channel_destination);
        let _ = sender
            .send(envelope::encode(&setup), crate::transport::SendOptions::default())
            .await;
    }

    async fn continue_channel_upload(self: Arc<Self>, envelope: Envelope) {
        let Some(upload) = self.channel_uploads.get(&envelope.call_id) else {
            return;
        };
        if upload.started.elapsed() > self.options.channel_inactivity_timeout {
            drop(upload);
            self.channel_uploads.remove(&envelope.call_id);
            return;
        }

        match envelope.message_type {
            MessageType::SignalFragment => {
                if let Some(response_id) = envelope.response_id {
                    let index = envelope
                        .properties
                        .get_int(envelope::wire::FRAGMENT_INDEX)
                        .unwrap_or_default();
                    upload
                        .fragments
                        .lock()
                        .unwrap()
                        .add_fragment(response_id, index as u32, envelope.payload);
                }
            }
            MessageType::StreamClosed => {
                let Some(response_id) = envelope.response_id else {
                    return;
                };
                let total = envelope
                    .properties
                    .get_int(envelope::wire::FRAGMENTS_TOTAL)
                    .unwrap_or_default();
                let Ok(expected_digest) = envelope
                    .properties
                    .get_text(envelope::wire::DATA_CHECKSUM_MD5)
                else {
                    return;
                };
                let assembled = upload.fragments.lock().unwrap().add_terminator(
                    response_id,
                    total as u32,
                    expected_digest.to_owned(),
                );
                drop(upload);
                self.channel_uploads.remove(&envelope.call_id);

                match assembled {
                    Ok(payload) => {
                        let reconstructed = Envelope {
                            payload,
                            message_type: MessageType::Signal,
                            ..envelope
                        };
                        self.dispatch_signal(reconstructed).await;
                    }
                    Err(err) => {
                        event!(target: "CHANNEL_UPLOAD_REJECTED", Level::WARN, call_id = %envelope.call_id, error = %err);
                    }
                }
            }
            _ => {}
        }
    }
}

//! A minimal driver over the in-process transport: wires an echo
//! [`RequestSink`] on one end and a client call on the other, then prints the
//! streamed responses.

use std::{sync::Arc, time::Duration};

use argus_messaging::{
    binding::SessionBinding,
    call_id::CallId,
    envelope::{Envelope, MessageType, ProtocolVersion},
    logging::init_events,
    request_handler::RequestHandler,
    server_proxy::{RequestSink, ServerProxy, ServerProxyOptions},
    time::wall_clock,
    transport::{memory::MemoryBroker, AckMode, Connection, TransportError},
};
use async_trait::async_trait;
use clap::Parser;

#[derive(Parser)]
struct Cli {
    /// Enable structured JSON logging.
    #[arg(short, long)]
    log: bool,

    /// The text payload to send in the demo call.
    #[arg(short, long, default_value = "hello from the demo client")]
    message: String,
}

struct EchoSink;

#[async_trait]
impl RequestSink for EchoSink {
    async fn signal(
        &self,
        payload: Vec<u8>,
        ctx: Arc<argus_messaging::response_context::ResponseContext>,
        _max_wait_millis: u64,
    ) {
        ctx.add_response(payload).await;
        ctx.end_of_stream().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), TransportError> {
    let cli = Cli::parse();
    if cli.log {
        init_events();
    }

    println!("argus-messaging demo v{}", env!("CARGO_PKG_VERSION"));

    let broker = MemoryBroker::new();
    let server_connection: Arc<dyn Connection> = Arc::new(broker.connect("server"));
    let client_connection: Arc<dyn Connection> = Arc::new(broker.connect("client"));

    let server = Arc::new(ServerProxy::new(
        vec![server_connection.clone()],
        "signal-inbox",
        Arc::new(EchoSink),
        ServerProxyOptions::default(),
        wall_clock(),
    ));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(server.run(shutdown_rx));

    let client_binding = SessionBinding::new(
        vec![client_connection.clone()],
        "client-reply",
        AckMode::AutoAck,
        Duration::ZERO,
    );
    let reply_to = client_binding.get_destination().await?;
    let receiver = client_binding.get_receiver().await?;

    let server_destination = server_connection.destination("signal-inbox").await?;
    let sender = server_connection.sender(&server_destination).await?;

    let call_id = CallId::new();
    let handler = Arc::new(RequestHandler::new(true, call_id, 5_000, wall_clock()));

    let clock = wall_clock();
    let mut signal = Envelope::new(ProtocolVersion::V2, MessageType::Signal, call_id)
        .with_reply_to(reply_to)
        .with_payload(cli.message.into_bytes());
    signal.properties.set(
        argus_messaging::envelope::wire::REQ_TIMEOUT,
        (clock.now_millis() + 5_000) as i64,
    );
    sender
        .send(
            argus_messaging::envelope::encode(&signal),
            Default::default(),
        )
        .await?;

    let dispatcher = argus_messaging::client_dispatcher::ClientDispatcher::new();
    dispatcher.register(handler.clone());

    tokio::spawn(async move {
        loop {
            let message = receiver.lock().await.recv().await;
            match message {
                Ok(message) => {
                    if let Ok(envelope) = argus_messaging::envelope::decode(&message) {
                        dispatcher.on_envelope(envelope);
                    }
                }
                Err(_) => return,
            }
        }
    });

    handler.wait_for_end_of_stream(5_000).await;
    for response in handler.get_responses_no_wait().unwrap_or_default() {
        println!("response: {}", String::from_utf8_lossy(&response));
    }

    Ok(())
}

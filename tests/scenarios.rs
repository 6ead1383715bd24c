//! Black-box scenarios exercising a client call end to end over the
//! in-process transport, driving only the crate's public API.

use std::{sync::Arc, time::Duration};

use argus_messaging::{
    call_id::CallId,
    client_dispatcher::ClientDispatcher,
    envelope::{self, Envelope, MessageType, ProtocolVersion},
    frag::{digest, split},
    request_handler::RequestHandler,
    response_context::ResponseContext,
    time::wall_clock,
    transport::{memory::MemoryBroker, AckMode, Connection, Sender},
};

/// Wires a client reply destination and a server-side sender pointed at it,
/// returning the handler/dispatcher pair driving the client and the sender a
/// test can use to play the server's part directly.
async fn wire_call(call_id: CallId, allow_keep_alive: bool, max_wait_millis: u64) -> (
    Arc<RequestHandler>,
    Arc<ClientDispatcher>,
    Arc<dyn Sender>,
) {
    let broker = MemoryBroker::new();
    let client_connection = broker.connect("client");
    let reply_to = client_connection.destination("reply").await.unwrap();
    let mut receiver = client_connection.receiver(&reply_to, AckMode::AutoAck).await.unwrap();
    let server_connection = broker.connect("server");
    let sender: Arc<dyn Sender> = Arc::from(server_connection.sender(&reply_to).await.unwrap());

    let handler = Arc::new(RequestHandler::new(
        allow_keep_alive,
        call_id,
        max_wait_millis,
        wall_clock(),
    ));
    let dispatcher = Arc::new(ClientDispatcher::new());
    dispatcher.register(handler.clone());

    let routing_dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        while let Ok(message) = receiver.recv().await {
            if let Ok(envelope) = envelope::decode(&message) {
                routing_dispatcher.on_envelope(envelope);
            }
        }
    });

    (handler, dispatcher, sender)
}

fn signal_response(call_id: CallId, payload: &[u8]) -> Envelope {
    Envelope::new(ProtocolVersion::V2, MessageType::SignalResponse, call_id).with_payload(payload.to_vec())
}

fn stream_closed(call_id: CallId) -> Envelope {
    Envelope::new(ProtocolVersion::V2, MessageType::StreamClosed, call_id)
}

async fn send(sender: &dyn Sender, envelope: Envelope) {
    sender
        .send(envelope::encode(&envelope), Default::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn single_response() {
    let call_id = CallId::new();
    let (handler, _dispatcher, sender) = wire_call(call_id, true, 1_000).await;

    send(&*sender, signal_response(call_id, b"r0")).await;
    send(&*sender, stream_closed(call_id)).await;

    let responses = handler.get_responses(1_000, 10).await.unwrap();
    assert_eq!(responses, vec![b"r0".to_vec()]);
    assert!(handler.wait_for_end_of_stream(100).await);
}

#[tokio::test]
async fn one_hundred_responses_streamed_in_order() {
    let call_id = CallId::new();
    let (handler, _dispatcher, sender) = wire_call(call_id, true, 2_000).await;

    for i in 0..100 {
        send(&*sender, signal_response(call_id, format!("r{i}").as_bytes())).await;
    }
    send(&*sender, stream_closed(call_id)).await;

    let mut collected = Vec::new();
    while let Some(response) = handler.get_next_response(1_000).await.unwrap() {
        collected.push(response);
    }
    let expected: Vec<Vec<u8>> = (0..100).map(|i| format!("r{i}").into_bytes()).collect();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn keep_alive_extension_allowed() {
    let call_id = CallId::new();
    let (handler, _dispatcher, sender) = wire_call(call_id, true, 200).await;

    for _ in 0..3 {
        let mut extend = Envelope::new(ProtocolVersion::V2, MessageType::ExtendWait, call_id);
        let until = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
            + 500;
        extend.properties.set(envelope::wire::REQ_TIMEOUT, until);
        send(&*sender, extend).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    send(&*sender, signal_response(call_id, b"r0")).await;
    send(&*sender, stream_closed(call_id)).await;

    let responses = handler.get_responses(1_000, 10).await.unwrap();
    assert_eq!(responses, vec![b"r0".to_vec()]);
}

#[tokio::test]
async fn keep_alive_extension_disallowed_closes_at_initial_deadline() {
    let call_id = CallId::new();
    let (handler, _dispatcher, sender) = wire_call(call_id, false, 150).await;

    let mut extend = Envelope::new(ProtocolVersion::V2, MessageType::ExtendWait, call_id);
    extend.properties.set(envelope::wire::REQ_TIMEOUT, i64::MAX);
    send(&*sender, extend).await;

    assert!(handler.wait_for_end_of_stream(1_000).await);
    assert_eq!(handler.get_responses_no_wait().unwrap(), Vec::<Vec<u8>>::new());
}

#[tokio::test]
async fn fragmented_upload_reassembles_bit_identically() {
    let payload = b"the quick brown fox jumps over the lazy dog, forty-four bytes and change";
    let slices = split(payload, 10);
    let expected_digest = digest(&slices);
    let call_id = CallId::new();

    let broker = MemoryBroker::new();
    let connection = broker.connect("server");
    let dest = connection.destination("upload").await.unwrap();
    let mut receiver = connection.receiver(&dest, AckMode::AutoAck).await.unwrap();
    let sender: Arc<dyn Sender> = Arc::from(connection.sender(&dest).await.unwrap());

    let response_id = argus_messaging::call_id::ResponseId::new();
    for (index, slice) in slices.iter().enumerate() {
        let mut envelope = Envelope::new(ProtocolVersion::V2, MessageType::SignalFragment, call_id)
            .with_response_id(response_id)
            .with_payload(slice.to_vec());
        envelope.properties.set(envelope::wire::FRAGMENT_INDEX, index as i64);
        send(&*sender, envelope).await;
    }
    let mut terminator =
        Envelope::new(ProtocolVersion::V2, MessageType::StreamClosed, call_id).with_response_id(response_id);
    terminator
        .properties
        .set(envelope::wire::FRAGMENTS_TOTAL, slices.len() as i64)
        .set(envelope::wire::DATA_CHECKSUM_MD5, expected_digest);
    send(&*sender, terminator).await;

    let mut assembler = argus_messaging::frag::FragmentAssembler::new();
    let mut reassembled = None;
    for _ in 0..=slices.len() {
        let message = receiver.recv().await.unwrap();
        let envelope = envelope::decode(&message).unwrap();
        match envelope.message_type {
            MessageType::SignalFragment => {
                let index = envelope.properties.get_int(envelope::wire::FRAGMENT_INDEX).unwrap();
                assembler.add_fragment(response_id, index as u32, envelope.payload);
            }
            MessageType::StreamClosed => {
                let total = envelope.properties.get_int(envelope::wire::FRAGMENTS_TOTAL).unwrap();
                let digest = envelope.properties.get_text(envelope::wire::DATA_CHECKSUM_MD5).unwrap();
                reassembled = Some(
                    assembler
                        .add_terminator(response_id, total as u32, digest.to_owned())
                        .unwrap(),
                );
            }
            _ => unreachable!(),
        }
    }
    assert_eq!(reassembled.unwrap(), payload);
}

#[tokio::test]
async fn digest_mismatch_is_rejected() {
    let payload = b"0123456789";
    let slices = split(payload, 4);
    let response_id = argus_messaging::call_id::ResponseId::new();

    let mut assembler = argus_messaging::frag::FragmentAssembler::new();
    for (index, slice) in slices.iter().enumerate() {
        assembler.add_fragment(response_id, index as u32, slice.to_vec());
    }
    let err = assembler
        .add_terminator(response_id, slices.len() as u32, "not-the-real-digest".to_owned())
        .unwrap_err();
    assert!(matches!(
        err,
        argus_messaging::frag::FragmentError::DigestMismatch(_)
    ));
}

#[tokio::test]
async fn error_carriage_surfaces_through_get_next_response() {
    let call_id = CallId::new();
    let (handler, _dispatcher, sender) = wire_call(call_id, true, 1_000).await;

    let remote = argus_messaging::error::RemoteException::new("IllegalStateException", "boom");
    let exception = Envelope::new(ProtocolVersion::V2, MessageType::Exception, call_id)
        .with_payload(remote.encode());
    send(&*sender, exception).await;

    let err = handler.get_next_response(500).await.unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn response_context_end_of_stream_is_observed_at_most_once() {
    let broker = MemoryBroker::new();
    let connection = broker.connect("server");
    let dest = connection.destination("reply").await.unwrap();
    let mut receiver = connection.receiver(&dest, AckMode::AutoAck).await.unwrap();
    let sender: Arc<dyn Sender> = Arc::from(connection.sender(&dest).await.unwrap());

    let ctx = ResponseContext::new(
        CallId::new(),
        dest,
        ProtocolVersion::V2,
        sender,
        1_000,
        wall_clock(),
    );
    ctx.end_of_stream().await;
    ctx.end_of_stream().await;
    ctx.notify_error("AfterClose", "should be a no-op").await;

    let first = envelope::decode(&receiver.recv().await.unwrap()).unwrap();
    assert_eq!(first.message_type, MessageType::StreamClosed);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), receiver.recv())
            .await
            .is_err(),
        "no second terminal envelope should have been sent"
    );
}

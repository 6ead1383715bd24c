//! The wire envelope and its codec (§4.1).
//!
//! An [`Envelope`] is the unit this crate actually exchanges over a
//! [`Connection`](crate::transport::Connection): a version tag, a message
//! type, a correlation id, and a payload carried either as an opaque blob or
//! inline in the property set. [`encode`]/[`decode`] translate between an
//! `Envelope` and the [`TransportMessage`] the transport layer understands,
//! the seam that separates a call's typed payload from the bytes actually
//! sent over a [`Sender`](crate::transport::Sender).

use std::fmt;

use crate::{
    call_id::{CallId, ResponseId},
    properties::{PropertyError, Properties},
    transport::{Destination, TransportMessage},
};

/// The protocol version carried on every envelope. V2 adds fragmentation and
/// exception carriage; V1 must interoperate with V2 senders outside of those
/// features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl ProtocolVersion {
    fn wire_str(self) -> &'static str {
        match self {
            Self::V1 => "13.10.1",
            Self::V2 => "16",
        }
    }

    fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "13.10.1" => Some(Self::V1),
            "16" => Some(Self::V2),
            _ => None,
        }
    }
}

/// The envelope's message type, dispatched on by [`ClientDispatcher`](crate::client_dispatcher::ClientDispatcher)
/// and [`ServerProxy`](crate::server_proxy::ServerProxy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Signal,
    SignalFragment,
    EndOfFragmentedMessage,
    SignalResponse,
    StreamClosed,
    ExtendWait,
    Exception,
    ChannelRequest,
    ChannelSetup,
}

impl MessageType {
    fn wire_str(self) -> &'static str {
        match self {
            Self::Signal => "Signal",
            Self::SignalFragment => "SignalFragment",
            Self::EndOfFragmentedMessage => "EndOfFragmentedMessage",
            Self::SignalResponse => "SignalResponse",
            Self::StreamClosed => "StreamClosed",
            Self::ExtendWait => "ExtendWait",
            Self::Exception => "Exception",
            Self::ChannelRequest => "ChannelRequest",
            Self::ChannelSetup => "ChannelSetup",
        }
    }

    fn from_wire_str(s: &str) -> Option<Self> {
        Some(match s {
            "Signal" => Self::Signal,
            "SignalFragment" => Self::SignalFragment,
            "EndOfFragmentedMessage" => Self::EndOfFragmentedMessage,
            "SignalResponse" => Self::SignalResponse,
            "StreamClosed" => Self::StreamClosed,
            "ExtendWait" => Self::ExtendWait,
            "Exception" => Self::Exception,
            "ChannelRequest" => Self::ChannelRequest,
            "ChannelSetup" => Self::ChannelSetup,
            _ => return None,
        })
    }
}

/// The well-known property names making up the wire format (§6).
pub mod wire {
    pub const PROTOCOL_VERSION: &str = "ArgusMessagingProtocol";
    pub const MESSAGE_TYPE: &str = "MessageType";
    pub const CALL_ID: &str = "CallId";
    pub const RESPONSE_ID: &str = "ResponseID";
    pub const FRAGMENT_INDEX: &str = "FragmentIndex";
    pub const FRAGMENTS_TOTAL: &str = "FragmentsTotal";
    pub const DATA_CHECKSUM_MD5: &str = "DataChecksumMD5";
    pub const REQ_TIMEOUT: &str = "ReqTimeout";
}

/// A decoded envelope: the in-memory counterpart of a [`TransportMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: ProtocolVersion,
    pub message_type: MessageType,
    pub call_id: CallId,
    pub response_id: Option<ResponseId>,
    pub reply_to: Option<Destination>,
    pub properties: Properties,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(version: ProtocolVersion, message_type: MessageType, call_id: CallId) -> Self {
        Self {
            version,
            message_type,
            call_id,
            response_id: None,
            reply_to: None,
            properties: Properties::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_response_id(mut self, response_id: ResponseId) -> Self {
        self.response_id = Some(response_id);
        self
    }

    pub fn with_reply_to(mut self, reply_to: Destination) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Why a [`TransportMessage`] failed to decode into an [`Envelope`].
///
/// A decode rejection (§4.1) is deliberately not fatal: the caller drops the
/// message and continues, it does not fail the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeRejection {
    MissingProtocolVersion,
    UnrecognizedProtocolVersion(String),
    MissingMessageType,
    UnrecognizedMessageType(String),
    MissingCallId,
    MalformedCallId(String),
    MalformedResponseId(String),
    Property(PropertyError),
}

impl fmt::Display for DecodeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProtocolVersion => write!(f, "missing protocol version"),
            Self::UnrecognizedProtocolVersion(v) => write!(f, "unrecognized protocol version {v:?}"),
            Self::MissingMessageType => write!(f, "missing message type"),
            Self::UnrecognizedMessageType(t) => write!(f, "unrecognized message type {t:?}"),
            Self::MissingCallId => write!(f, "missing call id"),
            Self::MalformedCallId(c) => write!(f, "malformed call id {c:?}"),
            Self::MalformedResponseId(r) => write!(f, "malformed response id {r:?}"),
            Self::Property(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DecodeRejection {}

/// Serializes an [`Envelope`] into the [`TransportMessage`] a [`Sender`](crate::transport::Sender)
/// can carry.
pub fn encode(envelope: &Envelope) -> TransportMessage {
    let mut properties = envelope.properties.clone();
    properties.set(wire::PROTOCOL_VERSION, envelope.version.wire_str());
    properties.set(wire::MESSAGE_TYPE, envelope.message_type.wire_str());
    properties.set(wire::CALL_ID, envelope.call_id.to_string());
    if let Some(response_id) = envelope.response_id {
        properties.set(wire::RESPONSE_ID, response_id.to_string());
    }

    let mut message = TransportMessage::new(properties, envelope.payload.clone());
    message.reply_to = envelope.reply_to.clone();
    message
}

/// Deserializes a [`TransportMessage`] into an [`Envelope`], or reports why it
/// was rejected. Rejections are silent: the caller should drop the message.
pub fn decode(message: &TransportMessage) -> Result<Envelope, DecodeRejection> {
    let version_str = message
        .properties
        .get_text(wire::PROTOCOL_VERSION)
        .map_err(|_| DecodeRejection::MissingProtocolVersion)?;
    let version = ProtocolVersion::from_wire_str(version_str)
        .ok_or_else(|| DecodeRejection::UnrecognizedProtocolVersion(version_str.to_owned()))?;

    let type_str = message
        .properties
        .get_text(wire::MESSAGE_TYPE)
        .map_err(|_| DecodeRejection::MissingMessageType)?;
    let message_type = MessageType::from_wire_str(type_str)
        .ok_or_else(|| DecodeRejection::UnrecognizedMessageType(type_str.to_owned()))?;

    let call_id_str = message
        .properties
        .get_text(wire::CALL_ID)
        .map_err(|_| DecodeRejection::MissingCallId)?;
    let call_id: CallId = call_id_str
        .parse()
        .map_err(|_| DecodeRejection::MalformedCallId(call_id_str.to_owned()))?;

    let response_id = match message.properties.get(wire::RESPONSE_ID) {
        Some(value) => {
            let text = value.ok_text().map_err(DecodeRejection::Property)?;
            Some(
                text.parse::<ResponseId>()
                    .map_err(|_| DecodeRejection::MalformedResponseId(text.to_owned()))?,
            )
        }
        None => None,
    };

    let mut properties = message.properties.clone();
    properties.remove(wire::PROTOCOL_VERSION);
    properties.remove(wire::MESSAGE_TYPE);
    properties.remove(wire::CALL_ID);
    properties.remove(wire::RESPONSE_ID);

    Ok(Envelope {
        version,
        message_type,
        call_id,
        response_id,
        reply_to: message.reply_to.clone(),
        properties,
        payload: message.payload.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_and_decode() {
        let call_id = CallId::new();
        let envelope = Envelope::new(ProtocolVersion::V2, MessageType::Signal, call_id)
            .with_payload(b"hello".to_vec());

        let message = encode(&envelope);
        let decoded = decode(&message).unwrap();

        assert_eq!(decoded.version, ProtocolVersion::V2);
        assert_eq!(decoded.message_type, MessageType::Signal);
        assert_eq!(decoded.call_id, call_id);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn unknown_properties_survive_the_round_trip() {
        let call_id = CallId::new();
        let mut envelope = Envelope::new(ProtocolVersion::V1, MessageType::SignalResponse, call_id);
        envelope.properties.set("x-custom", "value");

        let decoded = decode(&encode(&envelope)).unwrap();
        assert_eq!(decoded.properties.get_text("x-custom").unwrap(), "value");
    }

    #[test]
    fn missing_protocol_version_is_rejected() {
        let message = TransportMessage::new(Properties::new(), vec![]);
        assert_eq!(
            decode(&message).unwrap_err(),
            DecodeRejection::MissingProtocolVersion
        );
    }

    #[test]
    fn unrecognized_message_type_is_rejected() {
        let mut properties = Properties::new();
        properties.set(wire::PROTOCOL_VERSION, ProtocolVersion::V2.wire_str());
        properties.set(wire::MESSAGE_TYPE, "SomethingFromTheFuture");
        properties.set(wire::CALL_ID, CallId::new().to_string());
        let message = TransportMessage::new(properties, vec![]);

        assert!(matches!(
            decode(&message).unwrap_err(),
            DecodeRejection::UnrecognizedMessageType(_)
        ));
    }
}

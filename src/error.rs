//! The crate's error taxonomy.
//!
//! Each module defines its own small `thiserror` enum for the failures it can
//! produce (`CodecError`, `FragmentError`, `TransportError`) rather than one
//! monolithic error type; this file only composes them into [`MessagingError`]
//! at the crate boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{codec::CodecError, frag::FragmentError, transport::TransportError};

/// The serialized error object carried as an `EXCEPTION` envelope's payload
/// (§4.1's V2 "exception carriage"), replacing a raw class-loaded exception
/// object with a stable, language-neutral shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteException {
    pub kind: String,
    pub message: String,
}

impl RemoteException {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Serializes this exception to the bytes an `EXCEPTION` envelope carries.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("RemoteException always serializes")
    }

    /// Deserializes an `EXCEPTION` envelope's payload. A payload that isn't
    /// valid JSON (e.g. from a non-conforming sender) decodes to a
    /// best-effort exception carrying the raw bytes as its message, rather
    /// than being rejected outright — the envelope itself already passed
    /// decode (§4.1); only the control semantics inside are being recovered.
    pub fn decode(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_else(|_| {
            Self::new("UnknownException", String::from_utf8_lossy(bytes).into_owned())
        })
    }
}

/// A call-level error, as surfaced to a client through `RequestHandler::notifyError`
/// or to a caller awaiting a response.
#[derive(Debug, ThisError)]
pub enum MessagingError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Fragment(#[from] FragmentError),

    /// The user-supplied `RequestSink` raised an error while handling a signal.
    #[error("request sink error: {0}")]
    Sink(String),

    /// The server sent an `EXCEPTION` envelope.
    #[error("remote error: {message}")]
    Remote {
        /// The remote error's type tag, preserved across the wire so callers
        /// can distinguish error kinds without parsing `message`.
        kind: String,
        message: String,
    },
}

impl MessagingError {
    /// Builds a [`MessagingError::Remote`] from a decoded `EXCEPTION` payload.
    pub fn remote(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A stable type token for this error, the same role `Remote::kind` plays
    /// for a server-reported exception. Used when re-raising a recorded error
    /// that isn't itself a `Remote` so the variant isn't lost behind a single
    /// generic label.
    pub fn kind_token(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TransportError",
            Self::Codec(_) => "CodecError",
            Self::Fragment(_) => "FragmentError",
            Self::Sink(_) => "SinkError",
            Self::Remote { .. } => "RemoteError",
        }
    }
}

impl From<RemoteException> for MessagingError {
    fn from(exception: RemoteException) -> Self {
        Self::remote(exception.kind, exception.message)
    }
}

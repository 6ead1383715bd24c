//! Payload codecs (§4.1, §9).
//!
//! Rather than deserializing a payload via a dynamic class-loader lookup
//! into whatever type the caller expects, this crate narrows that to an
//! explicit [`PayloadCodec`] trait and a [`CodecRegistry`] keyed by a
//! stable type tag carried in envelope properties.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("no codec registered for type tag {0:?}")]
    UnknownTag(String),
    #[error("failed to decode payload: {0}")]
    Malformed(String),
}

/// Narrows payload (de)serialization to two operations: encode a typed value
/// to bytes, decode bytes back to the typed value.
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// A codec for payloads already carried as UTF-8 text, the common case for
/// the scenarios in §8 (`TestMessage`-style string payloads).
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl PayloadCodec<String> for TextCodec {
    fn encode(&self, value: &String) -> Vec<u8> {
        value.clone().into_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// A codec passing payload bytes through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl PayloadCodec<Vec<u8>> for BytesCodec {
    fn encode(&self, value: &Vec<u8>) -> Vec<u8> {
        value.clone()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

/// A registry of [`PayloadCodec<Vec<u8>>`] implementations keyed by a stable
/// type tag, standing in for a fully-qualified class name lookup. Unknown
/// tags are a protocol error: the offending envelope is dropped, not fatal
/// to the session (§7).
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: Arc<DashMap<&'static str, Arc<dyn PayloadCodec<Vec<u8>>>>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: &'static str, codec: Arc<dyn PayloadCodec<Vec<u8>>>) {
        self.codecs.insert(tag, codec);
    }

    pub fn decode(&self, tag: &str, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let codec = self
            .codecs
            .get(tag)
            .ok_or_else(|| CodecError::UnknownTag(tag.to_owned()))?;
        codec.decode(bytes)
    }

    pub fn encode(&self, tag: &str, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let codec = self
            .codecs
            .get(tag)
            .ok_or_else(|| CodecError::UnknownTag(tag.to_owned()))?;
        Ok(codec.encode(value))
    }
}

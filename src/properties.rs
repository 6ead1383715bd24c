//! Typed key-value properties carried alongside an envelope.
//!
//! Protocols need to pass header-like metadata — a fragment index, a deadline,
//! a digest — that isn't part of the payload itself. [`Properties`] is a
//! small key-value store for exactly that, and [`PropertyValue`] narrows the
//! value space down to the handful of kinds the wire format in §6 actually
//! needs.

use rustc_hash::FxHashMap;
use std::ops::{Deref, DerefMut};
use thiserror::Error as ThisError;

/// A single property value: either text or a signed integer.
///
/// The wire format (§6) only ever carries strings and `long`/`int` deadlines
/// and counts, so this does not need a case per integer width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn ok_text(&self) -> Result<&str, PropertyError> {
        self.as_text().ok_or(PropertyError::WrongKind {
            expected: PropertyKind::Text,
        })
    }

    pub fn ok_int(&self) -> Result<i64, PropertyError> {
        self.as_int().ok_or(PropertyError::WrongKind {
            expected: PropertyKind::Int,
        })
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Int(value as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    Int,
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum PropertyError {
    #[error("expected a {expected:?} property value")]
    WrongKind { expected: PropertyKind },
    #[error("missing required property {0:?}")]
    Missing(&'static str),
}

/// A key-value store of [`PropertyValue`]s attached to an envelope.
///
/// Unknown properties are preserved on pass-through (§4.1); this crate never
/// strips a property it doesn't recognize.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    inner: FxHashMap<String, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> &mut Self {
        self.inner.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.inner.get(key)
    }

    pub fn get_text(&self, key: &'static str) -> Result<&str, PropertyError> {
        self.inner
            .get(key)
            .ok_or(PropertyError::Missing(key))?
            .ok_text()
    }

    pub fn get_int(&self, key: &'static str) -> Result<i64, PropertyError> {
        self.inner
            .get(key)
            .ok_or(PropertyError::Missing(key))?
            .ok_int()
    }
}

impl Deref for Properties {
    type Target = FxHashMap<String, PropertyValue>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Properties {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

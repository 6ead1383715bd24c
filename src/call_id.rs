//! Opaque call and response identifiers.
//!
//! A small `Copy`/`Hash`/`Display` newtype, never parsed, only ever compared
//! and echoed back. Call and response ids are client- and server-generated at
//! runtime, so they are backed by a UUIDv4 rather than a hash of a static
//! string.

use std::fmt::Display;
use uuid::Uuid;

/// A client-generated identifier for a single call, unique with overwhelming
/// probability. Treated as an opaque token; never parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(Uuid);

/// A server-generated identifier grouping the fragments of one response
/// within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResponseId(Uuid);

macro_rules! uuid_id {
    ($ty:ident) => {
        impl $ty {
            /// Generates a new, pseudorandom identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(CallId);
uuid_id!(ResponseId);

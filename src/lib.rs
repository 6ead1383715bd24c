//! A request/response and streaming-response session layer over a
//! message-oriented transport.
//!
//! A client issues a typed signal; one or more servers receive it, process
//! it, and stream back zero or more typed responses terminated by an
//! end-of-stream marker or an error. This crate copes with transport limits
//! (maximum message size, via fragmentation), transport failures (broker
//! disconnects and failover), slow or silent handlers (keep-alive extension),
//! and many concurrent multiplexed calls over a small pool of shared
//! transport connections.
//!
//! # Organization
//! - [`envelope`] and [`codec`] frame and serialize a call's payload
//! - [`frag`] splits and reassembles payloads that exceed the transport's
//!   maximum message size
//! - [`binding`] manages one logical connection binding, with reconnect and
//!   failback
//! - [`request_handler`] and [`client_dispatcher`] implement the client side
//!   of a call
//! - [`response_context`] and [`server_proxy`] implement the server side
//! - [`transport`] is the abstraction the core requires of a broker client
//!   library; [`transport::memory`] is an in-process implementation used by
//!   this crate's own tests and demo
//!
//! # Call lifecycle
//!
//! A client encodes a signal, [`frag`] splits it if needed, and
//! [`transport`] carries it to a server's [`server_proxy::ServerProxy`],
//! which reassembles it and invokes the user-supplied
//! [`server_proxy::RequestSink`] with a [`response_context::ResponseContext`].
//! The sink calls back into the context to stream responses, extend its
//! deadline, or signal completion or failure; each of those becomes an
//! envelope routed back through [`client_dispatcher::ClientDispatcher`] to
//! the originating [`request_handler::RequestHandler`], where the client's
//! blocking or non-blocking retrieval calls observe it.

pub mod binding;
pub mod call_id;
pub mod client_dispatcher;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod frag;
pub mod logging;
pub mod properties;
pub mod request_handler;
pub mod response_context;
pub mod server_proxy;
pub mod shutdown;
pub mod time;
pub mod transport;

pub use error::MessagingError;
pub use shutdown::{ExitStatus, Shutdown};

use dashmap::DashMap;
use std::hash::BuildHasherDefault;

/// A [`DashMap`] keyed with the faster, non-cryptographic `rustc_hash`
/// hasher, used throughout this crate's concurrent registries (call-id
/// lookups, destination registries) in place of the default hasher.
pub type FxDashMap<K, V> = DashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;

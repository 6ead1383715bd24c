//! Wrapper functions for structured logging of call and session lifecycle
//! events.
//!
//! Each function corresponds to one lifecycle transition named throughout §5
//! and §7 (session activation/invalidation/reconnect, call registration and
//! expiry, fragment rejection). These are meant to be called from inside the
//! dispatcher and proxy, not by application code.

use tracing::{event, Level};
use tracing_subscriber::FmtSubscriber;

use crate::call_id::CallId;

/// Initializes the global JSON event subscriber. Should be called once, at
/// process start; tests do not call this and instead rely on the default
/// no-op subscriber.
pub fn init_events() {
    let subscriber = FmtSubscriber::builder().json().finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install global tracing subscriber: {error}");
    }
}

/// Logs a call being registered with a [`crate::client_dispatcher::ClientDispatcher`].
pub fn call_registered_event(call_id: CallId, allow_keep_alive: bool) {
    event!(target: "CALL_REGISTERED", Level::INFO, call_id = %call_id, allow_keep_alive);
}

/// Logs a call being unregistered, either by the reaper or explicitly.
pub fn call_unregistered_event(call_id: CallId) {
    event!(target: "CALL_UNREGISTERED", Level::INFO, call_id = %call_id);
}

/// Logs a fragment set being rejected at reassembly time (missing index or
/// digest mismatch).
pub fn fragment_rejected_event(call_id: CallId, reason: &str) {
    event!(target: "FRAGMENT_REJECTED", Level::WARN, call_id = %call_id, reason);
}

/// Logs a transport session moving to `Active` against a named connection.
pub fn session_activated_event(connection_name: &str) {
    event!(target: "SESSION_ACTIVATED", Level::INFO, connection = connection_name);
}

/// Logs a transport session being invalidated.
pub fn session_invalidated_event(connection_name: &str) {
    event!(target: "SESSION_INVALIDATED", Level::INFO, connection = connection_name);
}

/// Logs a reconnect attempt's outcome.
pub fn session_reconnect_event(connection_name: &str, succeeded: bool) {
    event!(target: "SESSION_RECONNECT", Level::INFO, connection = connection_name, succeeded);
}

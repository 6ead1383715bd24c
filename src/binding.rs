//! The transport session binding (§4.3, §9).
//!
//! `SessionBinding` favors composition over an abstract base class: rather
//! than a `ClientBase`/`ServerBase` hierarchy, both
//! [`crate::client_dispatcher::ClientDispatcher`] and
//! [`crate::server_proxy::ServerProxy`] hold one of these and call plain
//! methods on it.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;
use tracing::{event, Level};

use crate::{
    logging::{session_activated_event, session_invalidated_event, session_reconnect_event},
    transport::{AckMode, Connection, Destination, Receiver, Sender, TransportError},
};

/// The binding's lifecycle state (§4.3's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Fresh,
    Active,
    Reconnecting,
    Closed,
}

struct Cached {
    destination: Destination,
    sender: Arc<dyn Sender>,
    receiver: Arc<Mutex<Box<dyn Receiver>>>,
}

struct Inner {
    state: BindingState,
    active_index: usize,
    activation_time: Option<Instant>,
    invalidating: bool,
    cached: Option<Cached>,
}

/// Binds callers to one of a list of candidate [`Connection`]s, lazily
/// constructing the destination/sender/receiver trio and hiding disconnect,
/// reconnect, and failback behind a small API.
///
/// Index 0 of `candidates` is the primary; the rest are fallbacks tried in
/// order. Failback is suppressed when there is only one candidate or the
/// configured interval is zero.
pub struct SessionBinding {
    candidates: Vec<Arc<dyn Connection>>,
    destination_name: String,
    ack_mode: AckMode,
    failback_interval: Duration,
    inner: Mutex<Inner>,
}

impl SessionBinding {
    pub fn new(
        candidates: Vec<Arc<dyn Connection>>,
        destination_name: impl Into<String>,
        ack_mode: AckMode,
        failback_interval: Duration,
    ) -> Self {
        assert!(!candidates.is_empty(), "a session binding needs at least one candidate connection");
        Self {
            candidates,
            destination_name: destination_name.into(),
            ack_mode,
            failback_interval,
            inner: Mutex::new(Inner {
                state: BindingState::Fresh,
                active_index: 0,
                activation_time: None,
                invalidating: false,
                cached: None,
            }),
        }
    }

    pub async fn state(&self) -> BindingState {
        self.inner.lock().await.state
    }

    /// Returns the connection currently selected as active, without
    /// constructing a destination/sender/receiver against it.
    pub async fn current_connection(&self) -> Arc<dyn Connection> {
        let inner = self.inner.lock().await;
        self.active_connection(&inner)
    }

    fn active_connection(&self, inner: &Inner) -> Arc<dyn Connection> {
        self.candidates[inner.active_index].clone()
    }

    async fn ensure_cached(&self, inner: &mut Inner) -> Result<(), TransportError> {
        if inner.cached.is_some() {
            return Ok(());
        }
        let connection = self.active_connection(inner);
        let destination = connection.destination(&self.destination_name).await?;
        let sender = Arc::from(connection.sender(&destination).await?);
        let receiver = connection.receiver(&destination, self.ack_mode).await?;
        inner.cached = Some(Cached {
            destination,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        });
        inner.state = BindingState::Active;
        inner.activation_time.get_or_insert_with(Instant::now);
        session_activated_event(connection.name());
        Ok(())
    }

    /// Returns the active destination, constructing it if this is the first
    /// call since the last invalidation.
    pub async fn get_destination(&self) -> Result<Destination, TransportError> {
        let mut inner = self.inner.lock().await;
        self.ensure_cached(&mut inner).await?;
        Ok(inner.cached.as_ref().unwrap().destination.clone())
    }

    /// Returns the active sender, constructing it if needed.
    pub async fn get_sender(&self) -> Result<Arc<dyn Sender>, TransportError> {
        let mut inner = self.inner.lock().await;
        self.ensure_cached(&mut inner).await?;
        Ok(inner.cached.as_ref().unwrap().sender.clone())
    }

    /// Returns the active receiver handle, constructing it if needed. The
    /// receiver is shared behind a mutex since only one task should be
    /// draining it at a time.
    pub async fn get_receiver(&self) -> Result<Arc<Mutex<Box<dyn Receiver>>>, TransportError> {
        let mut inner = self.inner.lock().await;
        self.ensure_cached(&mut inner).await?;
        Ok(inner.cached.as_ref().unwrap().receiver.clone())
    }

    /// Tears down the cached destination/sender/receiver and returns the
    /// binding to `Fresh`. Idempotent. Skipped (returns immediately) if a
    /// reconnect is already underway on another task, since invalidate and
    /// reconnect must never interleave (§5).
    pub async fn invalidate(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == BindingState::Reconnecting || inner.invalidating {
            return;
        }
        inner.invalidating = true;
        inner.cached = None;
        inner.state = BindingState::Fresh;
        inner.invalidating = false;
        session_invalidated_event(self.active_connection(&inner).name());
    }

    /// Retries constructing the destination/sender/receiver trio against the
    /// active connection until it succeeds or `max_reconnect_millis` elapses,
    /// sleeping one second between attempts. On final failure the binding
    /// transitions to `Closed` and no further attempts will be made.
    pub async fn reconnect(&self, max_reconnect_millis: u64) -> Result<(), TransportError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == BindingState::Reconnecting {
                return Ok(());
            }
            inner.state = BindingState::Reconnecting;
        }

        let deadline = Instant::now() + Duration::from_millis(max_reconnect_millis);
        loop {
            let mut inner = self.inner.lock().await;
            match self.ensure_cached(&mut inner).await {
                Ok(()) => {
                    session_reconnect_event(self.active_connection(&inner).name(), true);
                    return Ok(());
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        inner.state = BindingState::Closed;
                        session_reconnect_event(self.active_connection(&inner).name(), false);
                        event!(target: "SESSION_RECONNECT_FAILED", Level::WARN, error = %err);
                        return Err(err);
                    }
                }
            }
            drop(inner);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Advances the active-connection pointer round-robin from the current
    /// index, skipping back to the primary (index 0) once the candidate list
    /// is exhausted.
    pub async fn failover(&self) {
        let mut inner = self.inner.lock().await;
        inner.active_index = (inner.active_index + 1) % self.candidates.len();
        inner.cached = None;
        inner.state = BindingState::Fresh;
    }

    /// If a non-primary connection is active and the failback interval has
    /// elapsed since activation, resets the pointer to the primary and
    /// invalidates the current binding so the next resource access rebinds
    /// to it.
    ///
    /// Per an open question in the source this crate is modeled on, the
    /// activation timer is updated on every connection selection, not only on
    /// a successful failback: a failed failback attempt still resets the
    /// clock, so the next check waits a full interval rather than retrying
    /// immediately.
    pub async fn check_failback(&self) {
        if self.candidates.len() <= 1 || self.failback_interval.is_zero() {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.active_index == 0 {
            return;
        }
        let Some(activation_time) = inner.activation_time else {
            return;
        };
        if activation_time.elapsed() < self.failback_interval {
            return;
        }
        inner.active_index = 0;
        inner.cached = None;
        inner.state = BindingState::Fresh;
        inner.activation_time = Some(Instant::now());
        event!(target: "SESSION_FAILBACK", Level::INFO);
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.cached = None;
        inner.state = BindingState::Closed;
    }
}

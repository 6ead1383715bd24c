//! The client-side per-call state machine (§4.4).
//!
//! `RequestHandler` is structured like a BSD-style socket: a queue guarded by
//! a lock, a [`Notify`] to wake blocked readers, and a closed flag — plus a
//! deadline that server keep-alives may extend, and a recorded terminal
//! error.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use tokio::sync::Notify;

use crate::{
    call_id::CallId,
    error::MessagingError,
    time::SharedTimeSource,
};

/// The deadline extension implicitly granted on every delivered response,
/// keeping a call alive as long as the server keeps producing output (§4.4).
const IMPLICIT_KEEP_ALIVE_MILLIS: u64 = 10_000;

/// Per-call client state: buffers responses, tracks an extendable deadline,
/// and surfaces at most one terminal error.
pub struct RequestHandler {
    call_id: CallId,
    allow_keep_alive: bool,
    deadline_millis: AtomicU64,
    closed: AtomicBool,
    responses: RwLock<VecDeque<Vec<u8>>>,
    error: RwLock<Option<Arc<MessagingError>>>,
    notify: Notify,
    clock: SharedTimeSource,
    close_listeners: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    listeners_fired: AtomicBool,
}

impl RequestHandler {
    pub fn new(
        allow_keep_alive: bool,
        call_id: CallId,
        max_wait_millis: u64,
        clock: SharedTimeSource,
    ) -> Self {
        let deadline = clock.now_millis() + max_wait_millis;
        Self {
            call_id,
            allow_keep_alive,
            deadline_millis: AtomicU64::new(deadline),
            closed: AtomicBool::new(false),
            responses: RwLock::new(VecDeque::new()),
            error: RwLock::new(None),
            notify: Notify::new(),
            clock,
            close_listeners: Mutex::new(Vec::new()),
            listeners_fired: AtomicBool::new(false),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn allow_keep_alive(&self) -> bool {
        self.allow_keep_alive
    }

    /// Registers a callback fired exactly once, the first time this handler
    /// closes for any reason.
    pub fn on_close(&self, listener: impl FnOnce() + Send + 'static) {
        self.close_listeners.lock().unwrap().push(Box::new(listener));
    }

    fn fire_close_listeners(&self) {
        if self
            .listeners_fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            for listener in self.close_listeners.lock().unwrap().drain(..) {
                listener();
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.fire_close_listeners();
    }

    /// True if explicitly closed, or if the deadline has passed — in which
    /// case this call closes the handler as a side effect (§4.4).
    pub fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        if self.clock.now_millis() > self.deadline_millis.load(Ordering::SeqCst) {
            self.close();
            return true;
        }
        false
    }

    /// Enqueues a response. Rejected if already closed. Extends the deadline
    /// by an implicit keep-alive window so a server that keeps streaming
    /// output is never cut off mid-stream.
    pub fn add_response(&self, payload: Vec<u8>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.responses.write().unwrap().push_back(payload);
        self.extend_deadline(self.clock.now_millis() + IMPLICIT_KEEP_ALIVE_MILLIS);
        self.notify.notify_waiters();
        true
    }

    fn extend_deadline(&self, until_millis: u64) {
        self.deadline_millis.fetch_max(until_millis, Ordering::SeqCst);
    }

    /// Extends the deadline to `until_millis`, never shortening it. Rejected
    /// if closed or this handler was created with `allow_keep_alive = false`.
    pub fn keep_alive(&self, until_millis: u64) -> bool {
        if self.is_closed() || !self.allow_keep_alive {
            return false;
        }
        self.extend_deadline(until_millis);
        self.notify.notify_waiters();
        true
    }

    /// Marks the call's stream complete. Idempotent via `close`'s own
    /// idempotence.
    pub fn end_of_stream(&self) {
        self.close();
    }

    /// Records the call's terminal error, if none was recorded yet, and
    /// closes the handler. Subsequent errors are ignored (§4.4: "first error
    /// wins").
    pub fn notify_error(&self, err: MessagingError) {
        let mut slot = self.error.write().unwrap();
        if slot.is_none() {
            *slot = Some(Arc::new(err));
        }
        drop(slot);
        self.close();
    }

    /// Time remaining until this handler's own deadline, used to bound how
    /// long a waiting retrieval call sleeps so deadline expiry is noticed
    /// promptly rather than only on the next externally-driven wakeup.
    fn deadline_remaining(&self) -> Duration {
        let now = self.clock.now_millis();
        let deadline = self.deadline_millis.load(Ordering::SeqCst);
        if deadline <= now {
            Duration::ZERO
        } else {
            Duration::from_millis(deadline - now)
        }
    }

    /// Re-raises the recorded error, preserving its type token rather than
    /// flattening every kind down to one generic label — §8 scenario 6
    /// requires a remote error's type token (e.g. `IllegalStateException`) to
    /// survive the raise.
    fn take_error(&self) -> Result<(), MessagingError> {
        match &*self.error.read().unwrap() {
            Some(err) => Err(match err.as_ref() {
                MessagingError::Remote { kind, message } => MessagingError::remote(kind.clone(), message.clone()),
                other => MessagingError::remote(other.kind_token(), other.to_string()),
            }),
            None => Ok(()),
        }
    }

    /// Drains whatever responses are currently queued, without waiting.
    /// Raises if a terminal error was recorded.
    pub fn get_responses_no_wait(&self) -> Result<Vec<Vec<u8>>, MessagingError> {
        self.take_error()?;
        Ok(self.responses.write().unwrap().drain(..).collect())
    }

    /// Returns the next queued response, waiting up to `max_wait_millis`.
    /// Returns `None` on timeout, or on end-of-stream with an empty queue.
    /// Raises if a terminal error was recorded.
    pub async fn get_next_response(
        &self,
        max_wait_millis: u64,
    ) -> Result<Option<Vec<u8>>, MessagingError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_wait_millis);
        loop {
            self.take_error()?;
            if let Some(response) = self.responses.write().unwrap().pop_front() {
                return Ok(Some(response));
            }
            if self.is_closed() {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let wait_for = remaining.min(self.deadline_remaining() + Duration::from_millis(1));
            let _ = tokio::time::timeout(wait_for, self.notify.notified()).await;
        }
    }

    /// Returns as soon as either `max_results` responses are available, the
    /// call closes, or `max_wait_millis` elapses. Raises if a terminal error
    /// was recorded.
    pub async fn get_responses(
        &self,
        max_wait_millis: u64,
        max_results: usize,
    ) -> Result<Vec<Vec<u8>>, MessagingError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_wait_millis);
        let mut collected = Vec::new();
        loop {
            self.take_error()?;
            {
                let mut queue = self.responses.write().unwrap();
                while collected.len() < max_results {
                    match queue.pop_front() {
                        Some(response) => collected.push(response),
                        None => break,
                    }
                }
            }
            if collected.len() >= max_results || self.is_closed() {
                return Ok(collected);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(collected);
            }
            let wait_for = remaining.min(self.deadline_remaining() + Duration::from_millis(1));
            let _ = tokio::time::timeout(wait_for, self.notify.notified()).await;
        }
    }

    /// Waits for the call to close, up to `max_wait_millis`. Returns `false`
    /// if the wait elapses with the call still open (keep-alives may push the
    /// bound out before this returns).
    pub async fn wait_for_end_of_stream(&self, max_wait_millis: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_wait_millis);
        loop {
            if self.is_closed() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let wait_for = remaining.min(self.deadline_remaining() + Duration::from_millis(1));
            let _ = tokio::time::timeout(wait_for, self.notify.notified()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::wall_clock;

    fn handler(allow_keep_alive: bool, max_wait_millis: u64) -> RequestHandler {
        RequestHandler::new(allow_keep_alive, CallId::new(), max_wait_millis, wall_clock())
    }

    #[tokio::test]
    async fn responses_are_delivered_in_order_then_none() {
        let handler = handler(true, 1_000);
        handler.add_response(b"r0".to_vec());
        handler.add_response(b"r1".to_vec());
        handler.end_of_stream();

        assert_eq!(handler.get_next_response(100).await.unwrap().unwrap(), b"r0");
        assert_eq!(handler.get_next_response(100).await.unwrap().unwrap(), b"r1");
        assert_eq!(handler.get_next_response(100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn closed_handler_rejects_new_responses() {
        let handler = handler(true, 1_000);
        handler.end_of_stream();
        assert!(!handler.add_response(b"too-late".to_vec()));
    }

    #[tokio::test]
    async fn keep_alive_is_ignored_when_not_allowed() {
        let handler = handler(false, 50);
        assert!(!handler.keep_alive(u64::MAX));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handler.is_closed());
    }

    #[tokio::test]
    async fn error_is_raised_exactly_once_recorded() {
        let handler = handler(true, 1_000);
        handler.notify_error(MessagingError::remote("Boom", "kaboom"));
        handler.notify_error(MessagingError::remote("Other", "ignored"));
        let err = handler.get_responses_no_wait().unwrap_err();
        assert!(err.to_string().contains("kaboom"));
        assert!(handler.is_closed());
    }

    #[tokio::test]
    async fn raised_error_preserves_the_remote_type_token() {
        let handler = handler(true, 1_000);
        handler.notify_error(MessagingError::remote("IllegalStateException", "boom"));

        let err = handler.get_next_response(100).await.unwrap_err();
        match err {
            MessagingError::Remote { kind, message } => {
                assert_eq!(kind, "IllegalStateException");
                assert_eq!(message, "boom");
            }
            other => panic!("expected a Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_listener_fires_exactly_once() {
        let handler = handler(true, 1_000);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        handler.on_close(move || fired_clone.store(true, Ordering::SeqCst));
        handler.end_of_stream();
        handler.end_of_stream();
        assert!(fired.load(Ordering::SeqCst));
    }
}

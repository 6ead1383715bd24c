//! Injectable wall-clock capability.
//!
//! Tests that exercise deadlines and keep-alives need a clock they can reason
//! about without sleeping for real. [`TimeSource`] narrows every place this
//! crate would otherwise call `SystemTime::now()` to a single trait, threaded
//! through constructors the same way a [`Shutdown`](crate::shutdown::Shutdown)
//! handle is threaded through a component's startup.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// A source of the current time, expressed as milliseconds since the Unix epoch.
pub trait TimeSource: Send + Sync + 'static {
    /// The current time, in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// The default [`TimeSource`], backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as u64
    }
}

/// A shared handle to a [`TimeSource`].
pub type SharedTimeSource = Arc<dyn TimeSource>;

/// Returns a shared [`WallClock`].
pub fn wall_clock() -> SharedTimeSource {
    Arc::new(WallClock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A fake clock for deterministic timeout tests.
    #[derive(Default)]
    pub struct FakeClock(AtomicU64);

    impl FakeClock {
        pub fn new(start_millis: u64) -> Self {
            Self(AtomicU64::new(start_millis))
        }

        pub fn advance(&self, millis: u64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl TimeSource for FakeClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn wall_clock_advances() {
        let clock = WallClock;
        let first = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = clock.now_millis();
        assert!(second >= first);
    }

    #[test]
    fn fake_clock_is_deterministic() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
    }
}

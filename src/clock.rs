use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source consumed by the wheel.
///
/// The wheel only ever needs "how far past the epoch are we"; any source
/// whose readings never decrease is a valid implementation.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The system's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A hand-driven clock. Time only moves when `advance` is called, which
/// makes driver behavior fully deterministic in tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<State>,
}

#[derive(Debug)]
struct State {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(State {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Move time forward. Shared across clones.
    pub fn advance(&self, by: Duration) {
        *self.inner.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.base + *self.inner.offset.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_across_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));

        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now() - start, Duration::from_millis(500));
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}

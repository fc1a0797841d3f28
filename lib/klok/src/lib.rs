#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

use arc_swap::ArcSwap;
use iso8601_timestamp::{Duration, Timestamp};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

thread_local! {
    /// Thread-local clock
    ///
    /// Defaults to a plain wall clock, not to a `None`, since clocks are cheap to instantiate
    static THREAD_CLOCK: ArcSwap<Clock> = ArcSwap::new(Arc::new(Clock::default()));
}

/// Handle to adjust the delta of a mockable clock
#[derive(Clone)]
pub struct MockHandle {
    delta_ns: Arc<AtomicI64>,
}

impl MockHandle {
    /// Shift the clock by the given duration (negative durations rewind)
    pub fn shift(&self, delta: Duration) {
        let ns = delta.whole_nanoseconds() as i64;
        self.delta_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Set the delta to an absolute nanosecond value
    pub fn set_delta(&self, delta_ns: i64) {
        self.delta_ns.store(delta_ns, Ordering::Release);
    }
}

/// Guard which resets the thread-local clock upon drop
pub struct ClockGuard {
    old_clock: Arc<Clock>,
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        THREAD_CLOCK.with(|clock| clock.store(Arc::clone(&self.old_clock)));
    }
}

/// Clock with an optional adjustable delta
#[derive(Clone, Default)]
pub struct Clock {
    delta_ns: Option<Arc<AtomicI64>>,
}

impl Clock {
    /// Construct a new clock without an internal delta
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a mockable clock together with the handle adjusting its delta
    #[must_use]
    pub fn mockable() -> (Self, MockHandle) {
        let delta_ns = Arc::new(AtomicI64::default());

        let mock_handle = MockHandle {
            delta_ns: Arc::clone(&delta_ns),
        };
        let clock = Self {
            delta_ns: Some(delta_ns),
        };

        (clock, mock_handle)
    }

    /// Enter a context where this clock is installed into the thread-local context
    ///
    /// As long as the guard is kept live, the [`now`] function reads the time of this clock
    #[must_use]
    pub fn enter(&self) -> ClockGuard {
        let old_clock = THREAD_CLOCK.with(|clock| clock.swap(Arc::new(self.clone())));
        ClockGuard { old_clock }
    }

    /// Read the current time and apply the delta
    #[must_use]
    pub fn now(&self) -> Timestamp {
        let mut now = Timestamp::now_utc();

        if let Some(ref delta_ns) = self.delta_ns {
            now = now + Duration::nanoseconds(delta_ns.load(Ordering::Acquire));
        }

        now
    }
}

/// Read the current time from the thread-local clock
#[must_use]
pub fn now() -> Timestamp {
    THREAD_CLOCK.with(|clock| clock.load().now())
}

#[cfg(test)]
mod test {
    use crate::Clock;
    use iso8601_timestamp::Duration;

    #[test]
    fn can_forward() {
        let (clock, mock) = Clock::mockable();
        let _clock_guard = clock.enter();

        let now = crate::now();
        mock.shift(Duration::seconds(60));
        let after = crate::now();

        let delta = *after - *now;
        assert_eq!(delta.as_seconds_f32().round() as u8, 60);
    }

    #[test]
    fn can_rewind() {
        let (clock, mock) = Clock::mockable();
        let _clock_guard = clock.enter();

        let now = crate::now();
        mock.shift(Duration::seconds(-60));
        let after = crate::now();

        let delta = *now - *after;
        assert_eq!(delta.as_seconds_f32().round() as u8, 60);
    }

    #[test]
    fn guard_resets_clock() {
        let (clock, mock) = Clock::mockable();

        {
            let _clock_guard = clock.enter();
            mock.shift(Duration::hours(24));

            let skewed = crate::now();
            assert!(*skewed - *iso8601_timestamp::Timestamp::now_utc() > Duration::hours(23));
        }

        let back_to_normal = crate::now();
        assert!(*back_to_normal - *iso8601_timestamp::Timestamp::now_utc() < Duration::seconds(1));
    }
}

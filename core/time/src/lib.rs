//! Time module provides a non-global clock, which should be passed
//! as an argument to functions which need to read the current time.
//! In particular try to avoid storing the clock instances in the objects.
//! Functions which use system clock directly are non-deterministic.

use parking_lot::Mutex;
use std::sync::Arc;

pub use time::Duration;

/// Monotonic timestamp, used for measuring latencies and timeouts.
pub type Instant = std::time::Instant;

/// Wall-clock timestamp.
pub type Utc = time::OffsetDateTime;

/// Clock encapsulates a system clock, allowing to replace it
/// with a fake in tests.
#[derive(Clone)]
pub struct Clock(ClockInner);

#[derive(Clone)]
enum ClockInner {
    Real,
    Fake(FakeClock),
}

impl Clock {
    /// Constructor of the real clock. Use it in production code.
    pub fn real() -> Clock {
        Clock(ClockInner::Real)
    }

    /// Current time according to the monotonic clock.
    pub fn now(&self) -> Instant {
        match &self.0 {
            ClockInner::Real => Instant::now(),
            ClockInner::Fake(fake) => fake.now(),
        }
    }

    /// Current time according to the system/walltime clock.
    pub fn now_utc(&self) -> Utc {
        match &self.0 {
            ClockInner::Real => Utc::now_utc(),
            ClockInner::Fake(fake) => fake.now_utc(),
        }
    }
}

struct FakeClockInner {
    instant: Instant,
    utc: Utc,
}

/// Manually-advanced clock for tests. `now()` stays constant until
/// `advance()` is called.
#[derive(Clone)]
pub struct FakeClock(Arc<Mutex<FakeClockInner>>);

impl FakeClock {
    pub fn new(utc: Utc) -> Self {
        Self(Arc::new(Mutex::new(FakeClockInner { instant: Instant::now(), utc })))
    }

    /// Returns a clock reading this fake.
    pub fn clock(&self) -> Clock {
        Clock(ClockInner::Fake(self.clone()))
    }

    pub fn now(&self) -> Instant {
        self.0.lock().instant
    }

    pub fn now_utc(&self) -> Utc {
        self.0.lock().utc
    }

    /// Advances both the monotonic and the walltime reading. `d` has to be
    /// non-negative.
    pub fn advance(&self, d: Duration) {
        assert!(d >= Duration::ZERO);
        let mut inner = self.0.lock();
        inner.instant += d.unsigned_abs();
        inner.utc += d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::UNIX_EPOCH + Duration::days(18000))
    }
}

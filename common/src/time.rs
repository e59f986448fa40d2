// Monotonic nanosecond clock anchored at process start.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanosecond timestamp. Values from `now_nanos` are comparable within one
/// process; kernel receive timestamps constructed via `from_parts` share a
/// clock with each other but not with `now_nanos`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Nanos(pub u64);

impl Nanos {
    #[inline]
    pub const fn new(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Builds a timestamp from seconds + nanoseconds, as delivered in socket
    /// timestamp control messages.
    #[inline]
    pub const fn from_parts(secs: u64, nanos: u64) -> Self {
        Self(secs * 1_000_000_000 + nanos)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::ops::Sub for Nanos {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0.saturating_sub(rhs.0)
    }
}

/// Current time on the process-local monotonic clock.
#[inline]
pub fn now_nanos() -> Nanos {
    let epoch = EPOCH.get_or_init(Instant::now);
    Nanos(Instant::now().duration_since(*epoch).as_nanos() as u64)
}

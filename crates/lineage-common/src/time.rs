//! Machine time used to order lifecycle events.
//!
//! Every observing client stamps its events with the same per-host monotonic
//! clock, expressed in nanoseconds since boot. It keeps counting while the
//! host is suspended, as do process start times in procfs. Wall clock time is
//! never used for ordering.

use std::{fmt, ops::Sub, time::Duration};

use nix::time::{ClockId, clock_gettime};

/// Nanoseconds since boot on the host monotonic clock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Read the current time.
    pub fn now() -> Self {
        match clock_gettime(ClockId::CLOCK_BOOTTIME) {
            Ok(ts) => Self(ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64),
            Err(err) => {
                log::error!("reading boot clock: {err}");
                Self::ZERO
            }
        }
    }
}

impl From<u64> for Timestamp {
    fn from(ns: u64) -> Self {
        Self(ns)
    }
}

impl From<Timestamp> for Duration {
    fn from(ts: Timestamp) -> Self {
        Duration::from_nanos(ts.0)
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Timestamp) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

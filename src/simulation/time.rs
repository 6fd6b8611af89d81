//! Virtual simulation time.
//!
//! Every protocol interval (slot, SIFS, NAV deadlines, frame airtime) is
//! integer nanoseconds, so sums like `SIFS + 2 * slot` are exact and two runs
//! with the same inputs land on identical timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

pub const NANO_SECOND: u64 = 1;
pub const MICRO_SECOND: u64 = 1_000 * NANO_SECOND;
pub const MILLI_SECOND: u64 = 1_000 * MICRO_SECOND;
pub const SECOND: u64 = 1_000 * MILLI_SECOND;

/// Smallest non-zero delay. Used to push an event strictly after another
/// one scheduled for the same instant (NAV deadlines, CTS/DATA timers).
pub const EPSILON_DELAY: SimTime = SimTime(1);

/// Simulation time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(ns: u64) -> Self {
        SimTime(ns)
    }

    pub const fn from_micros(us: u64) -> Self {
        SimTime(us * MICRO_SECOND)
    }

    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms * MILLI_SECOND)
    }

    /// Create from seconds (float). Negative input clamps to zero.
    pub fn from_secs_f64(s: f64) -> Self {
        SimTime((s.max(0.0) * SECOND as f64) as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_micros(self) -> u64 {
        self.0 / MICRO_SECOND
    }

    pub const fn as_millis(self) -> u64 {
        self.0 / MILLI_SECOND
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / SECOND as f64
    }

    pub fn checked_add(self, rhs: SimTime) -> Option<SimTime> {
        self.0.checked_add(rhs.0).map(SimTime)
    }

    /// Time needed to push `bytes` through a channel of `bytes_per_second`.
    pub fn for_bytes(bytes: usize, bytes_per_second: u64) -> SimTime {
        SimTime(bytes as u64 * SECOND / bytes_per_second.max(1))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u64> for SimTime {
    type Output = SimTime;

    fn mul(self, rhs: u64) -> Self::Output {
        SimTime(self.0 * rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.0 / SECOND, self.0 % SECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_constructors_agree() {
        assert_eq!(SimTime::from_micros(1), SimTime::from_nanos(1_000));
        assert_eq!(SimTime::from_millis(2).as_micros(), 2_000);
        assert_eq!(SimTime::from_secs_f64(1.5).as_millis(), 1_500);
        assert_eq!(SimTime::from_secs_f64(-3.0), SimTime::ZERO);
    }

    #[test]
    fn subtraction_saturates() {
        let a = SimTime::from_micros(5);
        let b = SimTime::from_micros(7);
        assert_eq!(a - b, SimTime::ZERO);
        assert_eq!(b - a, SimTime::from_micros(2));
    }

    #[test]
    fn byte_airtime_at_one_megabit() {
        // 1 Mb/s = 125_000 bytes/s, 14 bytes take 112 µs
        assert_eq!(SimTime::for_bytes(14, 125_000), SimTime::from_micros(112));
    }

    #[test]
    fn display_uses_seconds_with_nanosecond_fraction() {
        assert_eq!(SimTime::from_nanos(1_000_000_123).to_string(), "1.000000123s");
    }
}

//! Absolute-time arithmetic for the timer subsystem, supplemented
//! from `original_source/dasynq/include/dasynq/timerbase.h`'s `time_val`:
//! a seconds/nanoseconds pair with `Add`/`Sub`/`Ord` and an exact integer
//! division-with-remainder helper, used to compute interval-timer overrun
//! counts precisely rather than with a fixed-point approximation.

use std::ops::{Add, Sub};
use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Which OS clock a timer is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    /// Wall-clock time; subject to adjustment (NTP step, `settimeofday`).
    System,
    /// Monotonic time; never steps backward.
    Monotonic,
}

/// An absolute point in time expressed as (seconds, nanoseconds), with
/// nanoseconds always normalized into `[0, 1_000_000_000)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    secs: i64,
    nanos: i32,
}

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime { secs: 0, nanos: 0 };

    pub fn new(secs: i64, nanos: i32) -> Self {
        Self::normalize(secs, nanos)
    }

    fn normalize(mut secs: i64, mut nanos: i32) -> Self {
        if nanos >= NANOS_PER_SEC as i32 {
            secs += (nanos as i64 / NANOS_PER_SEC) as i64;
            nanos %= NANOS_PER_SEC as i32;
        } else if nanos < 0 {
            let borrow = (-nanos as i64 + NANOS_PER_SEC - 1) / NANOS_PER_SEC;
            secs -= borrow;
            nanos += (borrow * NANOS_PER_SEC) as i32;
        }
        ClockTime { secs, nanos }
    }

    pub fn from_duration(d: Duration) -> Self {
        ClockTime::new(d.as_secs() as i64, d.subsec_nanos() as i32)
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> i32 {
        self.nanos
    }

    pub fn as_duration(&self) -> Duration {
        if self.secs < 0 {
            Duration::ZERO
        } else {
            Duration::new(self.secs as u64, self.nanos as u32)
        }
    }

    /// Integer-divide `self` by `rhs`, returning `(quotient, remainder)`
    /// such that `rhs * quotient + remainder == self` and
    /// `0 <= remainder < rhs`. Mirrors `dasynq::divide_timespec`; used by
    /// the timer heap's interval-overrun computation.
    pub fn div_rem(&self, rhs: ClockTime) -> (i64, ClockTime) {
        assert!(rhs > ClockTime::ZERO, "division by non-positive interval");
        let self_ns = self.to_total_nanos();
        let rhs_ns = rhs.to_total_nanos();
        let quotient = self_ns.div_euclid(rhs_ns);
        let remainder_ns = self_ns - quotient * rhs_ns;
        (quotient, ClockTime::from_total_nanos(remainder_ns))
    }

    fn to_total_nanos(&self) -> i128 {
        self.secs as i128 * NANOS_PER_SEC as i128 + self.nanos as i128
    }

    fn from_total_nanos(ns: i128) -> ClockTime {
        let secs = (ns.div_euclid(NANOS_PER_SEC as i128)) as i64;
        let nanos = (ns.rem_euclid(NANOS_PER_SEC as i128)) as i32;
        ClockTime { secs, nanos }
    }
}

impl Add for ClockTime {
    type Output = ClockTime;
    fn add(self, rhs: ClockTime) -> ClockTime {
        ClockTime::normalize(self.secs + rhs.secs, self.nanos + rhs.nanos)
    }
}

impl Sub for ClockTime {
    type Output = ClockTime;
    fn sub(self, rhs: ClockTime) -> ClockTime {
        ClockTime::normalize(self.secs - rhs.secs, self.nanos - rhs.nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_overflowing_nanos() {
        let t = ClockTime::new(1, 1_500_000_000);
        assert_eq!(t, ClockTime::new(2, 500_000_000));
    }

    #[test]
    fn normalizes_negative_nanos() {
        let t = ClockTime::new(2, -500_000_000);
        assert_eq!(t, ClockTime::new(1, 500_000_000));
    }

    #[test]
    fn subtraction_and_ordering() {
        let a = ClockTime::new(10, 0);
        let b = ClockTime::new(10, 500_000_000);
        assert!(a < b);
        assert_eq!(b - a, ClockTime::new(0, 500_000_000));
    }

    #[test]
    fn div_rem_computes_exact_overrun() {
        // 350ms elapsed over a 100ms interval -> 3 whole periods, 50ms remainder
        let elapsed = ClockTime::new(0, 350_000_000);
        let interval = ClockTime::new(0, 100_000_000);
        let (q, r) = elapsed.div_rem(interval);
        assert_eq!(q, 3);
        assert_eq!(r, ClockTime::new(0, 50_000_000));
    }

    #[test]
    fn div_rem_exact_multiple_has_zero_remainder() {
        let elapsed = ClockTime::new(1, 0);
        let interval = ClockTime::new(0, 250_000_000);
        let (q, r) = elapsed.div_rem(interval);
        assert_eq!(q, 4);
        assert_eq!(r, ClockTime::ZERO);
    }
}

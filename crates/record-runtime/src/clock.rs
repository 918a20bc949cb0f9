use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic timestamp measured in nanoseconds since the first clock read of the process.
///
/// Arithmetic saturates instead of wrapping, so `a - b` with `b > a` is zero
/// and adding to [`ClockTick::MAX`] stays at `MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ClockTick(u64);

impl ClockTick {
    pub const ZERO: ClockTick = ClockTick(0);
    pub const MAX: ClockTick = ClockTick(u64::MAX);

    pub const fn ticks_per_second() -> u64 {
        1_000_000_000
    }

    pub fn now() -> Self {
        let epoch = EPOCH.get_or_init(Instant::now);
        let nanos = epoch.elapsed().as_nanos();
        ClockTick(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub const fn from_ticks(ticks: u64) -> Self {
        ClockTick(ticks)
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Negative and NaN inputs clamp to zero; overly large inputs clamp to `MAX`.
    pub fn from_seconds(seconds: f64) -> Self {
        if !(seconds > 0.0) {
            return Self::ZERO;
        }
        let ticks = seconds * Self::ticks_per_second() as f64;
        if ticks >= u64::MAX as f64 {
            Self::MAX
        } else {
            ClockTick(ticks as u64)
        }
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / Self::ticks_per_second() as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: ClockTick) -> Self {
        ClockTick(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: ClockTick) -> Self {
        ClockTick(self.0.saturating_sub(other.0))
    }

    /// Ticks elapsed from `self` to now.
    pub fn elapsed(self) -> Self {
        Self::now().saturating_sub(self)
    }
}

impl Add for ClockTick {
    type Output = ClockTick;
    fn add(self, rhs: ClockTick) -> ClockTick {
        self.saturating_add(rhs)
    }
}

impl Sub for ClockTick {
    type Output = ClockTick;
    fn sub(self, rhs: ClockTick) -> ClockTick {
        self.saturating_sub(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_arithmetic() {
        let a = ClockTick::from_ticks(5);
        let b = ClockTick::from_ticks(9);
        assert_eq!(a - b, ClockTick::ZERO);
        assert_eq!(b - a, ClockTick::from_ticks(4));
        assert_eq!(ClockTick::MAX + a, ClockTick::MAX);
    }

    #[test]
    fn test_seconds_conversion() {
        let t = ClockTick::from_seconds(1.5);
        assert_eq!(t.ticks(), 1_500_000_000);
        assert!((t.as_seconds() - 1.5).abs() < 1e-12);
        assert_eq!(ClockTick::from_seconds(-3.0), ClockTick::ZERO);
        assert_eq!(ClockTick::from_seconds(f64::NAN), ClockTick::ZERO);
        assert_eq!(ClockTick::from_seconds(1e30), ClockTick::MAX);
    }

    #[test]
    fn test_now_is_monotonic() {
        let first = ClockTick::now();
        let second = ClockTick::now();
        assert!(second >= first);
        assert!(first.elapsed() >= ClockTick::ZERO);
    }
}

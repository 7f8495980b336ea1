//! Virtual time for the simulation kernel.
//!
//! Represents a logical timestamp with no dependency on `std::time`.
//! Time advances only when the environment processes events, never from
//! wall-clock observation.

use std::cmp::Ordering;

/// A point on the simulation clock, in abstract units (the bundled models
/// read them as seconds).
///
/// Backed by an `f64` so models can draw fractional delays. Ordering is
/// total (`f64::total_cmp`): NaN sorts after every other value, so the
/// calendar heap stays well-formed.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SimTime(f64);

impl SimTime {
    /// The zero-point of simulation time.
    pub const ZERO: SimTime = SimTime(0.0);

    /// Wrap a raw value.
    #[inline]
    pub fn new(t: f64) -> Self {
        SimTime(t)
    }

    /// Return the raw value.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// `true` for finite values (no NaN, no infinities).
    #[inline]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }

    /// Compute the absolute time that is `delay` units after `self`.
    ///
    /// Returns `None` when the delay is negative or the sum is not finite.
    #[inline]
    pub fn plus(self, delay: f64) -> Option<SimTime> {
        if delay.is_nan() || delay < 0.0 {
            return None;
        }
        let t = self.0 + delay;
        t.is_finite().then_some(SimTime(t))
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: SimTime) -> bool {
        self < other
    }

    /// Elapsed time between two points. `None` if `earlier` is after `self`.
    #[inline]
    pub fn duration_since(self, earlier: SimTime) -> Option<f64> {
        (self >= earlier).then(|| self.0 - earlier.0)
    }
}

impl Default for SimTime {
    fn default() -> Self {
        SimTime::ZERO
    }
}

impl From<f64> for SimTime {
    fn from(t: f64) -> Self {
        SimTime(t)
    }
}

impl From<u32> for SimTime {
    fn from(t: u32) -> Self {
        SimTime(f64::from(t))
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(SimTime::ZERO.as_f64(), 0.0);
        assert_eq!(SimTime::default(), SimTime::ZERO);
    }

    #[test]
    fn test_ordering() {
        let t1 = SimTime::new(1.5);
        let t2 = SimTime::new(20.0);
        assert!(t1 < t2);
        assert!(t1.is_before(t2));
        assert!(!t2.is_before(t1));
    }

    #[test]
    fn test_plus() {
        let t = SimTime::new(100.0);
        assert_eq!(t.plus(0.25), Some(SimTime::new(100.25)));
        assert_eq!(t.plus(0.0), Some(t));
    }

    #[test]
    fn test_plus_rejects_bad_delays() {
        let t = SimTime::new(1.0);
        assert!(t.plus(-0.5).is_none());
        assert!(t.plus(f64::NAN).is_none());
        assert!(t.plus(f64::INFINITY).is_none());
        assert!(SimTime::new(f64::MAX).plus(f64::MAX).is_none());
    }

    #[test]
    fn test_duration_since() {
        let t1 = SimTime::new(10.0);
        let t2 = SimTime::new(30.0);
        assert_eq!(t2.duration_since(t1), Some(20.0));
        assert_eq!(t1.duration_since(t2), None);
    }

    #[test]
    fn test_nan_sorts_after_everything() {
        assert!(SimTime::new(f64::NAN) > SimTime::new(f64::INFINITY));
        assert!(!SimTime::new(f64::NAN).is_finite());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", SimTime::new(42.0)), "T=42");
        assert_eq!(format!("{}", SimTime::new(0.5)), "T=0.5");
    }
}

//! Wraparound-safe event counting
use std::fmt;

/// Raw value of a [`ProcessedCount`]
pub type ProcessedCountValue = u32;

/// Signed counterpart of [`ProcessedCountValue`] with the same bit width
type ProcessedCountDiff = i32;

/// Number of events that have been processed
///
/// The counter wraps around modulo 2^32. Two counter values must
/// never be compared directly! Use [`ProcessedCount::has_reached()`]
/// that interprets the (wrapping) difference as a signed value.
/// This yields the correct ordering as long as both values are less
/// than 2^31 increments apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessedCount(ProcessedCountValue);

impl ProcessedCount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(value: ProcessedCountValue) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> ProcessedCountValue {
        self.0
    }

    /// The count after `offset` more events have been processed
    #[must_use]
    pub const fn advanced_by(self, offset: ProcessedCountValue) -> Self {
        Self(self.0.wrapping_add(offset))
    }

    /// Count a single processed event
    pub fn increment(&mut self) {
        *self = self.advanced_by(1);
    }

    /// Signed distance from `other` to `self`
    ///
    /// Positive if `self` is ahead of `other`.
    #[must_use]
    pub const fn distance_from(self, other: Self) -> i64 {
        self.0.wrapping_sub(other.0) as ProcessedCountDiff as i64
    }

    /// Check if this count is equal to or ahead of `target`
    #[must_use]
    pub const fn has_reached(self, target: Self) -> bool {
        self.distance_from(target) >= 0
    }

    /// The later of two counts in wraparound order
    #[must_use]
    pub const fn latest(self, other: Self) -> Self {
        if self.has_reached(other) {
            self
        } else {
            other
        }
    }
}

impl From<ProcessedCountValue> for ProcessedCount {
    fn from(from: ProcessedCountValue) -> Self {
        Self::new(from)
    }
}

impl From<ProcessedCount> for ProcessedCountValue {
    fn from(from: ProcessedCount) -> Self {
        from.value()
    }
}

impl fmt::Display for ProcessedCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_reached_without_wraparound() {
        let current = ProcessedCount::new(10);
        assert!(current.has_reached(ProcessedCount::new(9)));
        assert!(current.has_reached(ProcessedCount::new(10)));
        assert!(!current.has_reached(ProcessedCount::new(11)));
    }

    #[test]
    fn has_reached_across_wraparound() {
        let before_wrap = ProcessedCount::new(ProcessedCountValue::MAX - 1);
        let target = before_wrap.advanced_by(5);
        assert_eq!(3, target.value());
        // A direct comparison of the raw values would claim the opposite
        assert!(before_wrap.value() > target.value());
        assert!(!before_wrap.has_reached(target));
        assert!(!before_wrap.advanced_by(4).has_reached(target));
        assert!(before_wrap.advanced_by(5).has_reached(target));
        assert!(before_wrap.advanced_by(6).has_reached(target));
    }

    #[test]
    fn increment_wraps_to_zero() {
        let mut count = ProcessedCount::new(ProcessedCountValue::MAX);
        count.increment();
        assert_eq!(ProcessedCount::ZERO, count);
        assert_eq!(1, count.distance_from(ProcessedCount::new(ProcessedCountValue::MAX)));
    }

    #[test]
    fn latest_respects_wraparound_order() {
        let early = ProcessedCount::new(ProcessedCountValue::MAX);
        let late = early.advanced_by(2);
        assert_eq!(late, early.latest(late));
        assert_eq!(late, late.latest(early));
    }
}

//! Streaming min/max/average aggregation over unsigned metric values

use serde::Serialize;

/// Unsigned integer widths that metric fields are recorded in
pub trait MetricValue: Copy + Default + Ord + Into<u128> + TryFrom<u128> {}

impl MetricValue for u8 {}
impl MetricValue for u16 {}
impl MetricValue for u32 {}
impl MetricValue for u64 {}

/// Snapshot of an aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Stats<T> {
    pub min: T,
    pub max: T,
    pub avg: T,
}

/// Constant-memory fold of a stream of values
///
/// The running sum is widened to `u128`, so averaging 64-bit magnitudes
/// cannot overflow.
#[derive(Debug, Clone, Default)]
pub struct Aggregator<T: MetricValue> {
    count: u64,
    sum: u128,
    min: T,
    max: T,
}

impl<T: MetricValue> Aggregator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation
    pub fn add(&mut self, value: T) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value.into();
    }

    /// Number of values folded so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&self) -> Stats<T> {
        if self.count == 0 {
            return Stats::default();
        }
        // The truncated mean never exceeds max, so the conversion back cannot fail.
        let avg = T::try_from(self.sum / self.count as u128).unwrap_or(self.max);
        Stats {
            min: self.min,
            max: self.max,
            avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_aggregator_is_zero() {
        let agg = Aggregator::<u64>::new();
        assert_eq!(agg.count(), 0);
        assert_eq!(agg.snapshot(), Stats { min: 0, max: 0, avg: 0 });
    }

    #[test]
    fn test_single_value() {
        let mut agg = Aggregator::<u32>::new();
        agg.add(42);
        assert_eq!(agg.snapshot(), Stats { min: 42, max: 42, avg: 42 });
    }

    #[test]
    fn test_many_values_truncated_mean() {
        let mut agg = Aggregator::<u32>::new();
        for v in [7, 3, 9, 4] {
            agg.add(v);
        }
        // 23 / 4 = 5.75, truncated
        assert_eq!(agg.snapshot(), Stats { min: 3, max: 9, avg: 5 });
    }

    #[test]
    fn test_no_overflow_at_u64_max() {
        let mut agg = Aggregator::<u64>::new();
        agg.add(u64::MAX);
        agg.add(u64::MAX);
        agg.add(u64::MAX - 2);
        let stats = agg.snapshot();
        assert_eq!(stats.max, u64::MAX);
        assert_eq!(stats.min, u64::MAX - 2);
        assert_eq!(stats.avg, u64::MAX - 1);
    }

    #[test]
    fn test_add_after_snapshot() {
        let mut agg = Aggregator::<u64>::new();
        agg.add(10);
        assert_eq!(agg.snapshot().avg, 10);
        agg.add(20);
        assert_eq!(agg.snapshot(), Stats { min: 10, max: 20, avg: 15 });
    }

    #[test]
    fn test_small_widths() {
        let mut agg = Aggregator::<u8>::new();
        agg.add(255);
        agg.add(255);
        assert_eq!(agg.snapshot().avg, 255);
    }
}

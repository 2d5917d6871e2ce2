/// Identity of one exported series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub topic: String,
    pub group: String,
    pub partition: i32,
}

impl SeriesKey {
    pub fn new(topic: impl Into<String>, group: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            partition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagMeasurement {
    pub key: SeriesKey,
    pub lag: i64,
    pub current_offset: i64,
}

pub struct LagCalculator;

impl LagCalculator {
    /// Offset lag clamped at zero. The two offsets are read at different
    /// times, so a committed offset past the high-water mark is possible.
    pub fn lag(high_water_mark: i64, committed_offset: i64) -> i64 {
        high_water_mark.saturating_sub(committed_offset).max(0)
    }

    /// `None` when the group has no committed position on the partition.
    pub fn measure(
        topic: &str,
        group: &str,
        partition: i32,
        high_water_mark: i64,
        committed_offset: i64,
    ) -> Option<LagMeasurement> {
        if committed_offset < 0 {
            return None;
        }

        Some(LagMeasurement {
            key: SeriesKey::new(topic, group, partition),
            lag: Self::lag(high_water_mark, committed_offset),
            current_offset: committed_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::NO_COMMITTED_OFFSET;
    use crate::test_strategies::strategies::{arb_group_id, arb_offsets, arb_topic};
    use proptest::prelude::*;

    #[test]
    fn test_lag_regular() {
        let m = LagCalculator::measure("orders", "billing", 0, 100, 80).unwrap();
        assert_eq!(m.key, SeriesKey::new("orders", "billing", 0));
        assert_eq!(m.lag, 20);
        assert_eq!(m.current_offset, 80);
    }

    #[test]
    fn test_lag_caught_up() {
        let m = LagCalculator::measure("orders", "billing", 1, 50, 50).unwrap();
        assert_eq!(m.lag, 0);
        assert_eq!(m.current_offset, 50);
    }

    #[test]
    fn test_lag_clamped_when_committed_ahead() {
        // Committed offset read after the high-water mark moved on
        let m = LagCalculator::measure("orders", "billing", 0, 100, 110).unwrap();
        assert_eq!(m.lag, 0);
        assert_eq!(m.current_offset, 110);
    }

    #[test]
    fn test_no_committed_offset_is_excluded() {
        assert!(LagCalculator::measure("orders", "billing", 1, 50, NO_COMMITTED_OFFSET).is_none());
        assert!(LagCalculator::measure("orders", "billing", 1, 50, -1001).is_none());
    }

    #[test]
    fn test_zero_committed_offset_is_reported() {
        let m = LagCalculator::measure("orders", "billing", 0, 42, 0).unwrap();
        assert_eq!(m.lag, 42);
        assert_eq!(m.current_offset, 0);
    }

    proptest! {
        #[test]
        fn prop_lag_never_negative((high, committed) in arb_offsets()) {
            prop_assert!(LagCalculator::lag(high, committed) >= 0);
        }

        #[test]
        fn prop_lag_exact_when_behind((high, committed) in arb_offsets()) {
            let diff = high - committed;
            if diff >= 0 {
                prop_assert_eq!(LagCalculator::lag(high, committed), diff);
            } else {
                prop_assert_eq!(LagCalculator::lag(high, committed), 0);
            }
        }

        #[test]
        fn prop_measure_keeps_identity(
            topic in arb_topic(),
            group in arb_group_id(),
            partition in 0i32..1024,
            (high, committed) in arb_offsets(),
        ) {
            let m = LagCalculator::measure(&topic, &group, partition, high, committed).unwrap();
            prop_assert_eq!(m.key, SeriesKey::new(topic, group, partition));
            prop_assert_eq!(m.current_offset, committed);
        }
    }
}

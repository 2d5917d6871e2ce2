#[cfg(test)]
pub mod strategies {
    use proptest::prelude::*;

    /// (high-water mark, committed offset), both non-negative. The committed
    /// offset may run past the high-water mark (non-atomic reads).
    pub fn arb_offsets() -> impl Strategy<Value = (i64, i64)> {
        (0..i64::MAX / 2).prop_flat_map(|high| (Just(high), 0..=high.saturating_add(100)))
    }

    /// Arbitrary non-internal topic name
    pub fn arb_topic() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9._-]{0,30}"
    }

    /// Arbitrary non-empty group ID
    pub fn arb_group_id() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9._-]{0,48}"
    }
}

use crate::BucketConfig;

/// The single mutable value behind a bucket.
///
/// `tokens` is only accurate as of `last_refill_ns`; the count visible "now"
/// is always [`available`] of this snapshot. Values are never mutated in
/// place, a new snapshot replaces the old one as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketState {
    pub(crate) tokens: i64,
    /// Nanoseconds since the bucket's clock anchor.
    pub(crate) last_refill_ns: u64,
}

impl BucketState {
    pub(crate) fn new(tokens: i64, last_refill_ns: u64) -> Self {
        Self {
            tokens,
            last_refill_ns,
        }
    }
}

/// Tokens that should be visible at `now_ns`, given the snapshot `state`.
///
/// Only whole refill periods are credited. A clock that did not advance (or
/// went backward) credits nothing. The capacity cap is applied once at least
/// one period has been credited, so debt is repaid gradually and a forced
/// overflow stays visible until the next period boundary.
pub(crate) fn available(config: &BucketConfig, state: &BucketState, now_ns: u64) -> i64 {
    let elapsed = match now_ns.checked_sub(state.last_refill_ns) {
        Some(elapsed) if elapsed > 0 => elapsed,
        _ => return state.tokens,
    };

    let periods = elapsed / config.refill_period_ns();
    if periods == 0 {
        return state.tokens;
    }

    let added = i64::try_from(periods)
        .unwrap_or(i64::MAX)
        .saturating_mul(config.refill_tokens());
    state
        .tokens
        .saturating_add(added)
        .min(config.capacity_tokens())
}

use std::time::Duration;

/// Errors produced when configuring or calling a [`TokenBucket`](crate::TokenBucket).
///
/// Contention and rejection are never reported here: a failed compare-and-swap is
/// retried internally, and "not enough tokens" is an ordinary return value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BucketError {
    /// Capacity must be in `1..=i64::MAX`.
    #[error("capacity must be between 1 and {max}, got {0}", max = i64::MAX)]
    InvalidCapacity(u64),

    /// Refill amount must be in `1..=i64::MAX`.
    #[error("refill amount must be between 1 and {max}, got {0}", max = i64::MAX)]
    InvalidRefillAmount(u64),

    /// Refill period must be non-zero and fit in `u64` nanoseconds.
    #[error("refill period must be a positive duration of at most u64::MAX nanoseconds, got {0:?}")]
    InvalidRefillPeriod(Duration),

    /// A requested amount cannot be represented as a signed token count.
    #[error("token amount {0} is out of range (max {max})", max = i64::MAX)]
    AmountOutOfRange(u64),
}

use std::time::Duration;

use crate::BucketError;

/// Validated, immutable bucket configuration.
///
/// Once a `BucketConfig` exists every divisor the refill math relies on is
/// known to be positive, so a [`TokenBucket`](crate::TokenBucket) can never be
/// built in an invalid state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    capacity: i64,
    refill_amount: i64,
    refill_period_ns: u64,
}

impl BucketConfig {
    /// Validates and creates a configuration.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum tokens held under capped operations.
    /// * `refill_amount` - Tokens granted per full refill period.
    /// * `refill_period` - Duration of one refill period.
    ///
    /// # Errors
    ///
    /// Returns a [`BucketError`] if any value is zero or too large for the
    /// signed nanosecond arithmetic used by the bucket.
    pub fn new(
        capacity: u64,
        refill_amount: u64,
        refill_period: Duration,
    ) -> Result<Self, BucketError> {
        let capacity = positive_i64(capacity).ok_or(BucketError::InvalidCapacity(capacity))?;
        let refill_amount =
            positive_i64(refill_amount).ok_or(BucketError::InvalidRefillAmount(refill_amount))?;
        let refill_period_ns = u64::try_from(refill_period.as_nanos())
            .ok()
            .filter(|ns| *ns > 0)
            .ok_or(BucketError::InvalidRefillPeriod(refill_period))?;

        Ok(Self {
            capacity,
            refill_amount,
            refill_period_ns,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    pub fn refill_amount(&self) -> u64 {
        self.refill_amount as u64
    }

    pub fn refill_period(&self) -> Duration {
        Duration::from_nanos(self.refill_period_ns)
    }

    pub(crate) fn capacity_tokens(&self) -> i64 {
        self.capacity
    }

    pub(crate) fn refill_tokens(&self) -> i64 {
        self.refill_amount
    }

    pub(crate) fn refill_period_ns(&self) -> u64 {
        self.refill_period_ns
    }

    /// Time needed to earn `deficit` tokens: `deficit * period / refill_amount`,
    /// truncated, saturating at `u64::MAX` nanoseconds.
    pub(crate) fn wait_for(&self, deficit: u64) -> Duration {
        let ns = deficit as u128 * self.refill_period_ns as u128 / self.refill_amount as u128;
        Duration::from_nanos(u64::try_from(ns).unwrap_or(u64::MAX))
    }
}

fn positive_i64(value: u64) -> Option<i64> {
    i64::try_from(value).ok().filter(|v| *v > 0)
}

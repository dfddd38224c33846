use std::time::Duration;

/// Outcome of [`TokenBucket::try_consume_with_probe`](crate::TokenBucket::try_consume_with_probe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionProbe {
    /// Whether the tokens were consumed.
    pub succeeded: bool,
    /// Tokens left after the attempt (the unchanged count on failure).
    pub remaining_tokens: i64,
    /// Time until enough tokens would be available. Zero on success.
    pub wait_time: Duration,
}

/// Outcome of [`TokenBucket::estimate`](crate::TokenBucket::estimate).
///
/// Nothing was consumed to produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimationProbe {
    pub would_succeed: bool,
    pub remaining_tokens: i64,
    pub wait_time: Duration,
}

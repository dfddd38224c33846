//! # token-tap
//!
//! `token-tap` provides a lock-free token bucket with debt, probes and
//! administrative adjustment.
//!
//! ## Core Philosophy
//!
//! The bucket's entire state is one immutable value (token count plus the time
//! it was computed) swapped atomically with Compare-And-Swap (CAS). There is no
//! `Mutex`: callers race, one swap wins, the others recompute and retry.
//!
//! ## Key Concepts
//!
//! * **Lock-Free**: No `Mutex` or `RwLock` anywhere in the bucket.
//! * **Lazy, Discrete Refill**: Whole refill periods are credited at the moment
//!   of a call. There are no background threads or timers.
//! * **Debt**: [`TokenBucket::consume_ignoring_limits`] may drive the count
//!   negative; elapsed periods repay it.
//! * **Probes**: [`ConsumptionProbe`] and [`EstimationProbe`] say how many
//!   tokens are left and how long to wait for more.
//! * **Strategy Trait**: A unified admission interface, used by
//!   `tower-token-tap`.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use token_tap::BucketConfig;
//! use token_tap::TokenBucket;
//!
//! let config = BucketConfig::new(5, 5, Duration::from_secs(10)).unwrap();
//! let bucket = TokenBucket::new(config);
//!
//! assert!(bucket.try_consume(4).unwrap());
//!
//! let probe = bucket.try_consume_with_probe(3).unwrap();
//! assert!(!probe.succeeded);
//! assert_eq!(probe.remaining_tokens, 1);
//! assert_eq!(probe.wait_time, Duration::from_secs(4));
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod bucket;
mod config;
mod error;
mod probe;
mod refill;

pub use bucket::TokenBucket;
pub use config::BucketConfig;
pub use error::BucketError;
pub use probe::ConsumptionProbe;
pub use probe::EstimationProbe;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Not enough tokens yet; `retry_after` is the estimated wait.
    Overloaded { retry_after: Duration },
    /// The request costs more than the strategy can ever hold.
    ExceedsCapacity { requested: u64, capacity: u64 },
}

/// The admission interface shared by rate-limiting strategies.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug {
    /// Attempts to admit a single unit of work.
    fn process(&self) -> ControlFlow<Reason> {
        self.process_n(1)
    }

    /// Attempts to admit work costing `cost` tokens.
    ///
    /// This method is non-blocking; a rejection leaves the strategy unchanged.
    fn process_n(&self, cost: u64) -> ControlFlow<Reason>;
}

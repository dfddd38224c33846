use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use quanta::Clock;
use quanta::Instant;
use tracing::debug;
use tracing::trace;

use crate::BucketConfig;
use crate::BucketError;
use crate::ConsumptionProbe;
use crate::EstimationProbe;
use crate::Reason;
use crate::Strategy;
use crate::refill;
use crate::refill::BucketState;

/// What an operation decided after seeing the current token count.
enum Transition<R> {
    /// Publish `tokens` (stamped with the current time) and return `R` once the swap lands.
    Commit(i64, R),
    /// Leave the state untouched and return `R`.
    Abort(R),
}

/// A lock-free token bucket.
///
/// All state lives in one immutable snapshot (token count plus the time it
/// was computed) behind an [`ArcSwap`]. Mutations recompute the refill, build a new snapshot and
/// publish it with a compare-and-swap, retrying if another caller won the
/// race. Reads never publish anything.
///
/// Refill is lazy and discrete: whole periods are credited at the moment of a
/// call, and every successful mutation restarts the period, discarding any
/// progress made inside the current one.
#[derive(Debug)]
pub struct TokenBucket {
    config: BucketConfig,
    state: ArcSwap<BucketState>,
    clock: Clock,
    /// A fixed point in time to calculate timestamps from.
    anchor: Instant,
}

impl TokenBucket {
    /// Creates a full bucket driven by the process monotonic clock.
    pub fn new(config: BucketConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Creates a full bucket driven by `clock`.
    ///
    /// Pass a [`Clock::mock`] to control elapsed time in tests.
    pub fn with_clock(config: BucketConfig, clock: Clock) -> Self {
        let anchor = clock.now();
        debug!(
            capacity = config.capacity(),
            refill_amount = config.refill_amount(),
            refill_period = ?config.refill_period(),
            "token bucket created"
        );

        Self {
            config,
            state: ArcSwap::from_pointee(BucketState::new(config.capacity_tokens(), 0)),
            clock,
            anchor,
        }
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Consumes `tokens` only if that many are available.
    ///
    /// A rejection writes nothing, so the refill period keeps running.
    ///
    /// # Errors
    ///
    /// [`BucketError::AmountOutOfRange`] if `tokens > i64::MAX`.
    pub fn try_consume(&self, tokens: u64) -> Result<bool, BucketError> {
        let tokens = signed(tokens)?;
        Ok(self.transition(|available| {
            if available >= tokens {
                Transition::Commit(available - tokens, true)
            } else {
                Transition::Abort(false)
            }
        }))
    }

    /// Consumes `tokens` unconditionally, going into debt if needed.
    ///
    /// Returns the penalty: the time it takes to repay the debt, or zero when
    /// the bucket stayed non-negative.
    ///
    /// # Errors
    ///
    /// [`BucketError::AmountOutOfRange`] if `tokens > i64::MAX`.
    pub fn consume_ignoring_limits(&self, tokens: u64) -> Result<Duration, BucketError> {
        let tokens = signed(tokens)?;
        Ok(self.transition(|available| {
            let remaining = available.saturating_sub(tokens);
            let penalty = if remaining >= 0 {
                Duration::ZERO
            } else {
                self.config.wait_for(remaining.unsigned_abs())
            };
            Transition::Commit(remaining, penalty)
        }))
    }

    /// Like [`try_consume`](Self::try_consume), but reports what is left and,
    /// on rejection, how long to wait.
    ///
    /// # Errors
    ///
    /// [`BucketError::AmountOutOfRange`] if `tokens > i64::MAX`.
    pub fn try_consume_with_probe(&self, tokens: u64) -> Result<ConsumptionProbe, BucketError> {
        let tokens = signed(tokens)?;
        Ok(self.transition(|available| {
            if available >= tokens {
                let remaining = available - tokens;
                Transition::Commit(
                    remaining,
                    ConsumptionProbe {
                        succeeded: true,
                        remaining_tokens: remaining,
                        wait_time: Duration::ZERO,
                    },
                )
            } else {
                Transition::Abort(ConsumptionProbe {
                    succeeded: false,
                    remaining_tokens: available,
                    wait_time: self.config.wait_for(deficit(tokens, available)),
                })
            }
        }))
    }

    /// Reports whether `tokens` could be consumed right now, without consuming
    /// them or touching the refill timestamp.
    ///
    /// # Errors
    ///
    /// [`BucketError::AmountOutOfRange`] if `tokens > i64::MAX`.
    pub fn estimate(&self, tokens: u64) -> Result<EstimationProbe, BucketError> {
        let tokens = signed(tokens)?;
        let available = self.available_tokens();
        Ok(if available >= tokens {
            EstimationProbe {
                would_succeed: true,
                remaining_tokens: available - tokens,
                wait_time: Duration::ZERO,
            }
        } else {
            EstimationProbe {
                would_succeed: false,
                remaining_tokens: available,
                wait_time: self.config.wait_for(deficit(tokens, available)),
            }
        })
    }

    /// Consumes every available token and returns how many that was.
    pub fn drain_all(&self) -> u64 {
        self.drain(i64::MAX)
    }

    /// Consumes up to `limit` tokens and returns how many were taken.
    ///
    /// # Errors
    ///
    /// [`BucketError::AmountOutOfRange`] if `limit > i64::MAX`.
    pub fn drain_up_to(&self, limit: u64) -> Result<u64, BucketError> {
        Ok(self.drain(signed(limit)?))
    }

    /// Adds `tokens`, never exceeding capacity.
    ///
    /// # Errors
    ///
    /// [`BucketError::AmountOutOfRange`] if `tokens > i64::MAX`.
    pub fn add_tokens(&self, tokens: u64) -> Result<(), BucketError> {
        let tokens = signed(tokens)?;
        let capacity = self.config.capacity_tokens();
        self.transition(|available| {
            Transition::Commit(available.saturating_add(tokens).min(capacity), ())
        });
        Ok(())
    }

    /// Adds `tokens` with no cap.
    ///
    /// The surplus stays visible until a full refill period elapses, at which
    /// point the count is capped again.
    ///
    /// # Errors
    ///
    /// [`BucketError::AmountOutOfRange`] if `tokens > i64::MAX`.
    pub fn force_add_tokens(&self, tokens: u64) -> Result<(), BucketError> {
        let tokens = signed(tokens)?;
        self.transition(|available| Transition::Commit(available.saturating_add(tokens), ()));
        Ok(())
    }

    /// Refills the bucket to capacity, discarding any debt or surplus.
    ///
    /// This is a plain store: it always succeeds and the last concurrent
    /// writer wins.
    pub fn reset(&self) {
        let now = self.now_ns();
        self.state.store(Arc::new(BucketState::new(
            self.config.capacity_tokens(),
            now,
        )));
        debug!(capacity = self.config.capacity(), "token bucket reset");
    }

    /// Tokens available right now. Negative while in debt.
    ///
    /// Read-only: the refill is computed but never written back.
    pub fn available_tokens(&self) -> i64 {
        let current = self.state.load();
        refill::available(&self.config, &current, self.now_ns())
    }

    fn drain(&self, limit: i64) -> u64 {
        self.transition(|available| {
            let taken = available.min(limit).max(0);
            if taken == 0 {
                Transition::Abort(0)
            } else {
                Transition::Commit(available - taken, taken as u64)
            }
        })
    }

    fn now_ns(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.anchor);
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Runs `decide` against a fresh refill of the current snapshot and
    /// publishes its result with a compare-and-swap.
    ///
    /// There is no retry bound: a lost race discards everything computed and
    /// starts over from a new snapshot. `decide` may therefore run more than
    /// once and must not have side effects.
    fn transition<R>(&self, mut decide: impl FnMut(i64) -> Transition<R>) -> R {
        loop {
            let current = self.state.load();
            let now = self.now_ns();
            if now < current.last_refill_ns {
                trace!(
                    now,
                    last_refill = current.last_refill_ns,
                    "clock is behind the last refill, crediting nothing"
                );
            }

            let available = refill::available(&self.config, &current, now);
            match decide(available) {
                Transition::Abort(outcome) => return outcome,
                Transition::Commit(tokens, outcome) => {
                    let next = Arc::new(BucketState::new(tokens, now));
                    let previous = self.state.compare_and_swap(&*current, next);
                    if Arc::ptr_eq(&*previous, &*current) {
                        return outcome;
                    }
                    trace!("token bucket contended, retrying");
                }
            }
        }
    }
}

impl Strategy for TokenBucket {
    fn process_n(&self, cost: u64) -> ControlFlow<Reason> {
        let capacity = self.config.capacity();
        if cost > capacity {
            return ControlFlow::Break(Reason::ExceedsCapacity {
                requested: cost,
                capacity,
            });
        }

        match self.try_consume_with_probe(cost) {
            Ok(probe) if probe.succeeded => ControlFlow::Continue(()),
            Ok(probe) => ControlFlow::Break(Reason::Overloaded {
                retry_after: probe.wait_time,
            }),
            Err(_) => ControlFlow::Break(Reason::ExceedsCapacity {
                requested: cost,
                capacity,
            }),
        }
    }
}

fn signed(tokens: u64) -> Result<i64, BucketError> {
    i64::try_from(tokens).map_err(|_| BucketError::AmountOutOfRange(tokens))
}

/// `wanted - available`, which may not fit in an `i64` when deep in debt.
fn deficit(wanted: i64, available: i64) -> u64 {
    (wanted as i128 - available as i128) as u64
}

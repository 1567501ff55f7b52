//! Exponential backoff with jitter under a wall-clock deadline.

use fleet_core::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stand-in deadline when the configured budget overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    deadline: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, deadline: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: 0.2,
            deadline,
        }
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// `min(max_delay, base_delay * 2^n)` before jitter.
    pub fn backoff(&self, n: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u128 << n.min(31);
        let scaled = self.base_delay.as_millis().saturating_mul(factor);
        Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64).min(self.max_delay)
    }

    /// Backoff for retry `n` with jitter applied, never above `max_delay`.
    pub fn delay_for(&self, n: u32) -> Duration {
        let bounded = self.backoff(n);
        if bounded.is_zero() || self.jitter <= 0.0 {
            return bounded;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        let jittered = (bounded.as_millis() as f64 * factor).round().max(0.0);
        Duration::from_millis(jittered as u64).min(self.max_delay)
    }
}

/// Retry bookkeeping for one boot. Lives only in memory.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    attempt_count: u32,
    next_delay: Duration,
    deadline: Instant,
}

impl RetryBudget {
    fn fresh(policy: &RetryPolicy) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(policy.deadline)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self {
            attempt_count: 0,
            next_delay: policy.backoff(0),
            deadline,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }
}

/// Runs an operation until it succeeds, fails fatally, runs out of time, or
/// is cancelled.
pub struct RetryScheduler {
    policy: RetryPolicy,
    budget: RetryBudget,
    cancel: CancellationToken,
}

impl RetryScheduler {
    /// Create a scheduler with a fresh budget; the deadline starts now.
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        let budget = RetryBudget::fresh(&policy);
        Self {
            policy,
            budget,
            cancel,
        }
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Run `operation` with retries. The closure receives the 1-based attempt
    /// number.
    ///
    /// Only transient errors are retried. No attempt starts after the
    /// deadline; the last backoff sleep is cut short at the deadline.
    pub async fn run_with_retry<T, F, Fut>(&mut self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            self.budget.attempt_count += 1;
            let attempt = self.budget.attempt_count;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                outcome = operation(attempt) => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    debug!(attempt, "Operation succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                warn!(attempt, error = %err, "Fatal failure, not retrying");
                return Err(err);
            }

            let now = Instant::now();
            let deadline = self.budget.deadline;
            if now >= deadline {
                return Err(self.timeout_error(&err));
            }

            let delay = self.policy.delay_for(attempt - 1);
            self.budget.next_delay = delay;
            warn!(
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, backing off"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(delay.min(deadline - now)) => {}
            }

            if Instant::now() >= deadline {
                return Err(self.timeout_error(&err));
            }
        }
    }

    fn timeout_error(&self, last: &Error) -> Error {
        Error::BootstrapTimeout {
            seconds: self.policy.deadline.as_secs(),
            attempts: self.budget.attempt_count,
            last_error: last.to_string(),
        }
    }
}

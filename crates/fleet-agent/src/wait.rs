//! Bounded polling for resources provisioned by another process.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fixed-interval poll with a hard ceiling of `interval * max_polls`.
#[derive(Debug, Clone, Copy)]
pub struct BoundedWait {
    interval: Duration,
    max_polls: u32,
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    /// The ceiling passed without the probe succeeding.
    Exhausted,
    Cancelled,
}

impl BoundedWait {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self { interval, max_polls }
    }

    /// Longest time `poll_until` can take.
    pub fn ceiling(&self) -> Duration {
        self.interval.saturating_mul(self.max_polls)
    }

    /// Probe immediately, then once per interval, until the probe returns
    /// `Some`, the ceiling is reached, or `cancel` fires.
    pub async fn poll_until<T, F>(&self, cancel: &CancellationToken, mut probe: F) -> WaitOutcome<T>
    where
        F: FnMut() -> Option<T>,
    {
        let mut polls = 0u32;
        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            if let Some(value) = probe() {
                return WaitOutcome::Ready(value);
            }
            if polls >= self.max_polls {
                return WaitOutcome::Exhausted;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = sleep(self.interval) => {}
            }
            polls += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately() {
        let wait = BoundedWait::new(Duration::from_secs(1), 300);
        let start = Instant::now();

        let outcome = wait.poll_until(&CancellationToken::new(), || Some(7)).await;

        assert_eq!(outcome, WaitOutcome::Ready(7));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_ceiling() {
        let wait = BoundedWait::new(Duration::from_secs(1), 300);
        let start = Instant::now();
        let mut probes = 0;

        let outcome: WaitOutcome<()> = wait
            .poll_until(&CancellationToken::new(), || {
                probes += 1;
                None
            })
            .await;

        assert_eq!(outcome, WaitOutcome::Exhausted);
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        assert_eq!(probes, 301);
        assert_eq!(wait.ceiling(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_some_polls() {
        let wait = BoundedWait::new(Duration::from_secs(1), 300);
        let start = Instant::now();
        let mut probes = 0;

        let outcome = wait
            .poll_until(&CancellationToken::new(), || {
                probes += 1;
                (probes == 5).then_some("fs-0a1b2c.efs.internal")
            })
            .await;

        assert_eq!(outcome, WaitOutcome::Ready("fs-0a1b2c.efs.internal"));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_mid_wait() {
        let wait = BoundedWait::new(Duration::from_secs(1), 300);
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                sleep(Duration::from_millis(2500)).await;
                cancel.cancel();
            }
        });
        let start = Instant::now();

        let outcome: WaitOutcome<()> = wait.poll_until(&cancel, || None).await;

        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }
}

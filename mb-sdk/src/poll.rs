//! Fixed-interval polling with an overall deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;

/// Why a poll loop stopped without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollError {
    /// The deadline passed. Carries the number of probes made.
    TimedOut { attempts: u32 },
    Cancelled,
}

/// Probe every `interval` until the probe yields a value or `timeout` elapses.
///
/// The first probe happens one interval after the start, so a 10 s interval
/// with a 300 s timeout makes exactly 30 probes before timing out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn poll<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut probe: F,
    ) -> Result<T, PollError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut ticker = interval_at(start + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = ticker.tick() => {}
            }

            attempts += 1;
            // A probe still running at the deadline is abandoned.
            let probed = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PollError::Cancelled),
                probed = probe(attempts) => probed,
                () = sleep_until(deadline) => return Err(PollError::TimedOut { attempts }),
            };
            if let Some(value) = probed {
                return Ok(value);
            }

            if Instant::now() >= deadline {
                return Err(PollError::TimedOut { attempts });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn ready_poller() -> Poller {
        Poller::new(Duration::from_secs(10), Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_thirty_probes() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result: Result<(), _> = ready_poller()
            .poll(&CancellationToken::new(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { None }
            })
            .await;

        assert_eq!(result, Err(PollError::TimedOut { attempts: 30 }));
        assert_eq!(calls.load(Ordering::SeqCst), 30);
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_still_times_out() {
        let start = Instant::now();
        let result: Result<(), _> = ready_poller()
            .poll(&CancellationToken::new(), |_| std::future::pending())
            .await;

        assert_eq!(result, Err(PollError::TimedOut { attempts: 1 }));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_counts_toward_deadline() {
        let start = Instant::now();
        let result: Result<(), _> = ready_poller()
            .poll(&CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(100)).await;
                None
            })
            .await;

        // Probes start at 10s, 110s and 210s; the third is cut off at 300s.
        assert_eq!(result, Err(PollError::TimedOut { attempts: 3 }));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_value() {
        let start = Instant::now();
        let result = ready_poller()
            .poll(&CancellationToken::new(), |attempt| async move {
                (attempt == 3).then_some("10.0.0.2")
            })
            .await;

        assert_eq!(result, Ok("10.0.0.2"));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_probe_before_first_interval() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = calls.clone();
        let poller = ready_poller();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            poller
                .poll(&token, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { None::<()> }
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Err(PollError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            token.cancel();
        });

        let start = Instant::now();
        let result: Result<(), _> = ready_poller()
            .poll(&cancel, |_| async { None })
            .await;

        assert_eq!(result, Err(PollError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(50));
    }
}

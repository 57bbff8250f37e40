use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cadence and deadline for polling a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    /// When set, the delay doubles after every poll up to this cap.
    pub max_interval: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
            max_interval: None,
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            max_interval: None,
        }
    }

    pub fn with_backoff(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn first_delay(&self) -> Duration {
        self.interval.max(MIN_POLL_INTERVAL)
    }

    fn next_delay(&self, current: Duration) -> Duration {
        match self.max_interval {
            Some(cap) => current.saturating_mul(2).min(cap.max(self.first_delay())),
            None => current,
        }
    }

    /// Upper bound on status fetches: `ceil(timeout / interval) + 1`.
    pub fn max_polls(&self) -> u64 {
        let interval = self.first_delay().as_nanos();
        let timeout = self.timeout.as_nanos();
        (timeout.div_ceil(interval) as u64).saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PollOutcome<S> {
    Terminal { value: S, polls: u32 },
    TimedOut { last: S, polls: u32 },
}

/// Polls `fetch` until `is_terminal` holds or the policy deadline passes.
///
/// `initial` is the state already known to the caller (usually the creation
/// response); it is inspected before the first sleep, so an already-terminal job
/// costs no status fetches. Sleeps are clipped to the remaining time so the loop
/// never overruns the deadline.
pub(crate) async fn poll_until_terminal<S, E, F, Fut>(
    initial: S,
    policy: &PollPolicy,
    is_terminal: impl Fn(&S) -> bool,
    mut fetch: F,
) -> Result<PollOutcome<S>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
{
    let started = Instant::now();
    let mut current = initial;
    let mut polls = 0u32;
    let mut delay = policy.first_delay();

    loop {
        if is_terminal(&current) {
            return Ok(PollOutcome::Terminal {
                value: current,
                polls,
            });
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Ok(PollOutcome::TimedOut {
                last: current,
                polls,
            });
        }

        sleep(delay.min(policy.timeout - elapsed)).await;
        current = fetch().await?;
        polls += 1;
        delay = policy.next_delay(delay);
    }
}

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::trace;

use crate::checks::{all_pass, ConditionCheck, Fetched};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PollError {
    #[error("timed out waiting for the condition after {steps} attempts")]
    Exhausted { steps: u32 },
    #[error("{0}")]
    Aborted(String),
}

/// Retry schedule: `steps` attempts, `duration` between the first two, each
/// following delay multiplied by `factor` and capped at `cap`. A non-zero
/// `jitter` adds up to `jitter * delay` on top of every sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub duration: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub steps: u32,
    pub cap: Option<Duration>,
}

impl BackoffPolicy {
    pub fn constant(duration: Duration, steps: u32) -> Self {
        Self { duration, factor: 1.0, jitter: 0.0, steps, cap: None }
    }

    pub fn exponential(duration: Duration, factor: f64, steps: u32) -> Self {
        Self { duration, factor, jitter: 0.0, steps, cap: None }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self { self.jitter = jitter.max(0.0); self }

    pub fn with_cap(mut self, cap: Duration) -> Self { self.cap = Some(cap); self }

    /// Upper bound of the time spent sleeping when every attempt fails.
    pub fn max_wait(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut d = self.duration;
        for _ in 1..self.steps {
            total += d.mul_f64(1.0 + self.jitter);
            d = self.grow(d);
        }
        total
    }

    fn grow(&self, d: Duration) -> Duration {
        if self.factor <= 0.0 { return d; }
        let next = d.mul_f64(self.factor);
        match self.cap { Some(cap) if next > cap => cap, _ => next }
    }

    fn jittered(&self, d: Duration) -> Duration {
        if self.jitter <= 0.0 { return d; }
        let r: f64 = rand::thread_rng().gen_range(0.0..1.0);
        d + d.mul_f64(r * self.jitter)
    }
}

/// Runs `attempt` until it yields `Ok(true)`, at most `policy.steps` times,
/// sleeping between attempts but never after the last one. An `Err` from
/// `attempt` ends the poll immediately.
pub async fn poll_fn<F, Fut>(policy: &BackoffPolicy, mut attempt: F) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, PollError>>,
{
    let mut delay = policy.duration;
    for n in 1..=policy.steps {
        if attempt().await? { return Ok(()); }
        if n == policy.steps { break; }
        let sleep = policy.jittered(delay);
        trace!(attempt = n, delay_ms = sleep.as_millis() as u64, "condition not met, retrying");
        tokio::time::sleep(sleep).await;
        delay = policy.grow(delay);
    }
    Err(PollError::Exhausted { steps: policy.steps })
}

/// Fetches with `fetch` and succeeds as soon as every check passes on the
/// fetched result. Checks run in order and stop at the first failure.
pub async fn poll<F, Fut>(mut fetch: F, checks: &[ConditionCheck], policy: &BackoffPolicy) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Fetched>,
{
    poll_fn(policy, || {
        let fut = fetch();
        async move { Ok(all_pass(checks, &fut.await)) }
    })
    .await
}

//! Bounded retry with a delay between attempts.
use serde::Deserialize;
use std::future::Future;
use tokio::time::{Duration, sleep};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Wait `delay_ms` between every attempt.
    #[default]
    Fixed,
    /// Double the wait after every failed attempt.
    Exponential,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        RetryPolicy {
            max_attempts,
            delay_ms,
            backoff: Backoff::Fixed,
        }
    }

    /// Single attempt, no waiting. Used on the request path.
    pub const fn once() -> Self {
        Self::fixed(1, 0)
    }

    /// Delay after the given (zero based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let millis = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential => self
                .delay_ms
                .saturating_mul(2_u64.saturating_pow(attempt)),
        };
        Duration::from_millis(millis)
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `op` receives the zero based attempt number. The wait happens only between attempts,
/// never after the last one. The error of the final attempt is returned; `None` means
/// the policy allowed no attempts at all.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, Option<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }

        let is_last = attempt + 1 == policy.max_attempts;
        let delay = policy.delay_after(attempt);
        if !is_last && !delay.is_zero() {
            sleep(delay).await;
        }
    }

    Err(last_error)
}

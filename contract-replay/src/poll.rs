use crate::error::Error;
use std::{future::Future, time::Duration};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// How long to keep asking before giving up on an asynchronous side effect.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// Backend jobs usually settle within a few seconds.
    pub fn job_status() -> Self {
        Self::new(DEFAULT_INTERVAL, 15)
    }

    /// Notification emails take longer to show up.
    pub fn email() -> Self {
        Self::new(DEFAULT_INTERVAL, 40)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::job_status()
    }
}

/// Awaits `probe` until it yields a value, sleeping `policy.interval` between attempts.
/// Probe errors end the wait immediately.
pub async fn wait_until<T, F, Fut>(policy: PollPolicy, what: &str, mut probe: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    for attempt in 1..=policy.attempts {
        if let Some(value) = probe().await? {
            tracing::debug!(what, attempt, "poll satisfied");
            return Ok(value);
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Error::Timeout {
        what: what.to_string(),
        attempts: policy.attempts,
    })
}

//! Retry with exponential backoff
//!
//! Used where the dialer waits on something outside its control, such as a
//! telephony device that is still registering when a campaign starts.

use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for repeated attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Delay to wait before attempt number `attempt` (0 is the first try)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential =
            self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis((exponential as u64).min(self.max_delay_ms))
    }

    /// Worst-case time spent sleeping across all retries
    pub fn total_delay(&self) -> Duration {
        (1..=self.max_retries).map(|a| self.delay_for(a)).sum()
    }
}

/// Run `operation` until it succeeds or the schedule runs out
///
/// Returns the last error once every attempt has failed.
///
/// ```no_run
/// use powerdial::utils::retry::{with_retry, RetryConfig};
///
/// # async fn register() -> anyhow::Result<String> { Ok("sip:agent-1".into()) }
/// # async fn demo() -> anyhow::Result<()> {
/// let contact = with_retry(&RetryConfig::new(5), || register()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = config.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis(), "Backing off before retry");
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(attempt, max_retries = config.max_retries, error = %e, "Attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made")))
}

/// Poll `probe` until it reports true, backing off between polls
///
/// Returns the number of polls it took.
pub async fn wait_until<F, Fut>(config: &RetryConfig, what: &str, probe: F) -> Result<u32>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let polls = AtomicU32::new(0);
    with_retry(config, || {
        polls.fetch_add(1, Ordering::Relaxed);
        let check = probe();
        async move {
            if check.await {
                Ok(())
            } else {
                anyhow::bail!("{what} is not ready")
            }
        }
    })
    .await?;
    Ok(polls.into_inner())
}

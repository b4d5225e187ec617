//! Eventual Condition Poller.
//!
//! Asynchronous UI feedback and out-of-band side effects (mail delivery)
//! become observable some time after the action that caused them. A
//! condition is checked immediately and then every `interval` until it holds
//! or `timeout` expires; the final attempt happens at the deadline, so a
//! failing poll takes `timeout` plus at most one attempt.
//!
//! Only "not observable yet" errors ([`ProbeError::is_retryable`]) are
//! absorbed between attempts. Anything else aborts the poll at once.
//!
//! Timing runs on `tokio::time`, so tests with a paused clock are exact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::result::{ProbeError, ProbeResult};

/// Default UI feedback timeout (5 seconds)
pub const DEFAULT_UI_TIMEOUT_MS: u64 = 5_000;

/// Default UI polling interval (100ms)
pub const DEFAULT_UI_INTERVAL_MS: u64 = 100;

/// Default mail delivery timeout (60 seconds)
pub const DEFAULT_MAIL_TIMEOUT_MS: u64 = 60_000;

/// Default mail polling interval (2 seconds)
pub const DEFAULT_MAIL_INTERVAL_MS: u64 = 2_000;

/// Timeout and interval for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Give up after this many milliseconds
    pub timeout_ms: u64,
    /// Sleep between attempts
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::fast()
    }
}

impl PollConfig {
    /// Create a config from milliseconds
    #[must_use]
    pub const fn from_millis(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }

    /// Preset for UI feedback (5s / 100ms)
    #[must_use]
    pub const fn fast() -> Self {
        Self::from_millis(DEFAULT_UI_TIMEOUT_MS, DEFAULT_UI_INTERVAL_MS)
    }

    /// Preset for mail delivery (60s / 2s)
    #[must_use]
    pub const fn mail() -> Self {
        Self::from_millis(DEFAULT_MAIL_TIMEOUT_MS, DEFAULT_MAIL_INTERVAL_MS)
    }

    /// Set timeout
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set interval
    #[must_use]
    pub const fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Timeout as a duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Interval as a duration
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// A predicate over observable state that may become true over time
#[async_trait]
pub trait EventualCondition: Send + Sync {
    /// What a satisfied check yields (a message, an element, a count)
    type Witness: Send;

    /// Human-readable description used in timeout errors and logs
    fn description(&self) -> String;

    /// Evaluate once: `Some` when satisfied, `None` when not yet
    async fn probe(&self) -> ProbeResult<Option<Self::Witness>>;
}

/// A satisfied condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<W> {
    /// Value yielded by the satisfying check
    pub witness: W,
    /// Number of attempts, at least 1
    pub attempts: u32,
    /// Time from the first check to satisfaction
    pub elapsed: Duration,
}

/// Check `condition` until it holds or `config.timeout` expires
pub async fn poll_until<C>(condition: &C, config: PollConfig) -> ProbeResult<Polled<C::Witness>>
where
    C: EventualCondition + ?Sized,
{
    let start = Instant::now();
    let deadline = start + config.timeout();
    let interval = config.interval().max(Duration::from_millis(1));
    let mut attempts = 0_u32;
    let mut last_error: Option<ProbeError> = None;

    loop {
        attempts += 1;
        match condition.probe().await {
            Ok(Some(witness)) => {
                let elapsed = start.elapsed();
                tracing::debug!(
                    condition = %condition.description(),
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "condition met"
                );
                return Ok(Polled {
                    witness,
                    attempts,
                    elapsed,
                });
            }
            Ok(None) => last_error = None,
            Err(err) if err.is_retryable() => {
                tracing::debug!(
                    condition = %condition.description(),
                    attempts,
                    error = %err,
                    "not yet"
                );
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }

        let now = Instant::now();
        if now >= deadline {
            let elapsed = now - start;
            tracing::debug!(
                condition = %condition.description(),
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "condition timed out"
            );
            let description = match last_error {
                Some(err) => format!("{} (last: {err})", condition.description()),
                None => condition.description(),
            };
            return Err(ProbeError::ConditionTimeout {
                description,
                elapsed,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Condition backed by an async closure
pub struct FnCondition<F> {
    description: String,
    check: F,
}

impl<F> std::fmt::Debug for FnCondition<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<F> FnCondition<F> {
    /// Wrap a closure returning `ProbeResult<Option<W>>`
    pub fn new(description: impl Into<String>, check: F) -> Self {
        Self {
            description: description.into(),
            check,
        }
    }
}

#[async_trait]
impl<F, Fut, W> EventualCondition for FnCondition<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult<Option<W>>> + Send + 'static,
    W: Send + 'static,
{
    type Witness = W;

    fn description(&self) -> String {
        self.description.clone()
    }

    async fn probe(&self) -> ProbeResult<Option<W>> {
        (self.check)().await
    }
}

/// Poll a closure and return its witness
pub async fn eventually<F, Fut, W>(
    description: impl Into<String>,
    config: PollConfig,
    check: F,
) -> ProbeResult<W>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult<Option<W>>> + Send + 'static,
    W: Send + 'static,
{
    let condition = FnCondition::new(description, check);
    poll_until(&condition, config).await.map(|p| p.witness)
}

//! Retry logic with exponential backoff
//!
//! One authentication attempt runs to completion (or is aborted) before the
//! next one starts. The engine decides what is retryable through
//! [`Error::is_retryable`]; this driver decides when to give up.

use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::{Error, Result};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Whether retries are enabled
    pub enabled: bool,
    /// Maximum attempts (0 = bounded by `max_elapsed_time` only)
    pub max_attempts: u32,
    /// Initial backoff
    pub initial_backoff: Duration,
    /// Maximum backoff
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed_time: Option<Duration>,
    /// Abort a single attempt after this long (the abort is retryable)
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
            max_elapsed_time: config.max_elapsed_time,
            attempt_timeout: config.attempt_timeout,
        }
    }

    /// Create the exponential backoff builder for this policy
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        let max_times = match self.max_attempts {
            0 => usize::MAX,
            n => usize::try_from(n.saturating_sub(1)).unwrap_or(usize::MAX),
        };
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier)
            .with_max_times(max_times)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// Execute an async operation with retry logic.
///
/// Stops on success, on a non-retryable error, when attempts or the elapsed
/// budget run out, or when `cancel` fires (reported as `Error::Cancelled`).
///
/// # Errors
///
/// Returns the last error from `f`, or `Error::Cancelled` on shutdown.
pub async fn with_retry<F, T>(
    policy: &RetryPolicy,
    name: &str,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T>
where
    F: AsyncFnMut() -> Result<T>,
{
    if !policy.enabled {
        return run_attempt(policy, cancel, &mut f).await;
    }

    let started = Instant::now();
    let mut backoff = policy.backoff().build();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let err = match run_attempt(policy, cancel, &mut f).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !err.is_retryable() {
            warn!(operation = name, error = %err, "Non-retryable failure");
            return Err(err);
        }

        let Some(delay) = backoff.next() else {
            debug!(operation = name, attempts, "Max retry attempts reached");
            return Err(err);
        };

        if let Some(budget) = policy.max_elapsed_time
            && started.elapsed() + delay > budget
        {
            debug!(
                operation = name,
                attempts,
                elapsed_ms = started.elapsed().as_millis(),
                "Retry time budget exhausted"
            );
            return Err(err);
        }

        debug!(
            operation = name,
            attempt = attempts,
            delay_ms = delay.as_millis(),
            error = %err,
            "Retrying after backoff"
        );

        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_attempt<F, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    f: &mut F,
) -> Result<T>
where
    F: AsyncFnMut() -> Result<T>,
{
    let attempt = async {
        match policy.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, f())
                .await
                .unwrap_or(Err(Error::Cancelled)),
            None => f().await,
        }
    };

    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = attempt => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            max_elapsed_time: None,
            attempt_timeout: None,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let result = with_retry(&fast_policy(5), "test", &cancel, async || {
            calls += 1;
            if calls < 3 {
                Err(Error::LoginFailed("flaky".into()))
            } else {
                Ok(calls)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let result: Result<()> = with_retry(&fast_policy(5), "test", &cancel, async || {
            calls += 1;
            Err(Error::Config("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let result: Result<()> = with_retry(&fast_policy(3), "test", &cancel, async || {
            calls += 1;
            Err(Error::MetadataUnavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::MetadataUnavailable(_))));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn disabled_policy_runs_once() {
        let cancel = CancellationToken::new();
        let mut policy = fast_policy(5);
        policy.enabled = false;
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, "test", &cancel, async || {
            calls += 1;
            Err(Error::LoginFailed("nope".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> =
            with_retry(&fast_policy(5), "test", &cancel, async || {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn attempt_timeout_is_retried() {
        let cancel = CancellationToken::new();
        let mut policy = fast_policy(3);
        policy.attempt_timeout = Some(Duration::from_millis(10));
        let mut calls = 0;
        let result = with_retry(&policy, "test", &cancel, async || {
            calls += 1;
            if calls == 1 {
                std::future::pending::<()>().await;
            }
            Ok(calls)
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn elapsed_budget_stops_retries() {
        let cancel = CancellationToken::new();
        let mut policy = fast_policy(0);
        policy.initial_backoff = Duration::from_millis(50);
        policy.max_backoff = Duration::from_millis(50);
        policy.max_elapsed_time = Some(Duration::from_millis(20));
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, "test", &cancel, async || {
            calls += 1;
            Err(Error::LoginFailed("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}

//! Authentication driver loop
//!
//! Keeps the access token fresh: authenticate (with retry), sleep for the
//! refresh interval, repeat. Init containers stop after the first success.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::authn::Authenticator;
use crate::config::Config;
use crate::retry::{RetryPolicy, with_retry};
use crate::{Error, Result};

/// Options for [`run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pause between successful authentications
    pub refresh_interval: Duration,
    /// Stop after the first successful authentication
    pub once: bool,
    /// Retry policy for each cycle
    pub retry: RetryPolicy,
}

impl RunOptions {
    /// Options for a configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_interval: config.token_refresh_interval,
            once: config.container_mode.runs_once(),
            retry: RetryPolicy::new(&config.retry),
        }
    }

    /// Force a single cycle.
    #[must_use]
    pub fn once(mut self, once: bool) -> Self {
        self.once |= once;
        self
    }
}

/// Drive `authenticator` until a cycle fails for good, a single cycle
/// completes in `once` mode, or `cancel` fires.
///
/// When the retry budget of a cycle is exhausted the access token is
/// deleted before the error is returned.
///
/// # Errors
///
/// Returns the error of the failed cycle.
pub async fn run(
    authenticator: &mut dyn Authenticator,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let authn_type = authenticator.authn_type();
    let mut cycles = 0u64;

    loop {
        cycles += 1;
        let result = with_retry(&options.retry, authn_type.as_str(), cancel, async || {
            authenticator.authenticate().await
        })
        .await;

        match result {
            Ok(()) => {
                info!(authn_type = %authn_type, cycle = cycles, "Access token refreshed");
            }
            Err(Error::Cancelled) if cancel.is_cancelled() => {
                info!("Shutdown requested, stopping authentication");
                return Ok(());
            }
            Err(e) => {
                error!(authn_type = %authn_type, error = %e, "Authentication failed");
                if let Err(delete_err) = authenticator.access_token().delete() {
                    warn!(error = %delete_err, "Failed to delete access token");
                }
                return Err(e);
            }
        }

        if options.once {
            return Ok(());
        }

        tokio::select! {
            () = cancel.cancelled() => {
                info!("Shutdown requested, stopping authentication");
                return Ok(());
            }
            () = tokio::time::sleep(options.refresh_interval) => {}
        }
    }
}

//! Waiting for the broker-delivered client certificate.
//!
//! The broker answers the CSR by writing the signed certificate into the
//! workload's filesystem rather than returning it in the response body.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Collaborator that blocks until the certificate file shows up.
#[async_trait]
pub trait CertificateWaiter: Send + Sync + fmt::Debug {
    /// Read the certificate at `path` once it exists and is non-empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertificateNotDelivered` when the wait is exhausted.
    async fn wait_for(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Polls the filesystem a bounded number of times.
#[derive(Debug, Clone)]
pub struct FileCertificateWaiter {
    retry_limit: u32,
    interval: Duration,
}

impl FileCertificateWaiter {
    /// Look up to `retry_limit` extra times, `interval` apart.
    #[must_use]
    pub fn new(retry_limit: u32, interval: Duration) -> Self {
        Self {
            retry_limit,
            interval,
        }
    }
}

#[async_trait]
impl CertificateWaiter for FileCertificateWaiter {
    async fn wait_for(&self, path: &Path) -> Result<Vec<u8>> {
        let mut waited = Duration::ZERO;

        for attempt in 0..=self.retry_limit {
            match tokio::fs::read(path).await {
                Ok(pem) if !pem.is_empty() => {
                    debug!(path = %path.display(), attempt, "Client certificate delivered");
                    return Ok(pem);
                }
                Ok(_) => debug!(path = %path.display(), "Client certificate file is still empty"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }

            if attempt < self.retry_limit {
                tokio::time::sleep(self.interval).await;
                waited += self.interval;
            }
        }

        warn!(
            path = %path.display(),
            waited_ms = waited.as_millis(),
            "Client certificate was not delivered"
        );
        Err(Error::CertificateNotDelivered {
            path: path.to_path_buf(),
            waited,
        })
    }
}

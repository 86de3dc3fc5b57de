//! Host identity parsing.
//!
//! A workload identity looks like `host/<policy...>/<leaf-id>`. The broker
//! resolves it in two halves: the *prefix* (policy path, sent in the
//! `Host-Id-Prefix` header during login) and the *suffix* (leaf identity,
//! embedded in the CSR common name). Older brokers only ever see the suffix,
//! which is why the split always keeps at most the last three segments on
//! the suffix side.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

const HOST_SEGMENT: &str = "host";
const SUFFIX_SEGMENTS: usize = 3;

/// A validated host identity, split into prefix and suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Username {
    full: String,
    prefix: String,
    suffix: String,
}

impl Username {
    /// Parse and validate a raw identity string.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentity` when the first segment is not `host`,
    /// no identity segment follows it, or any segment after it is empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.split('/').collect();

        if segments.first() != Some(&HOST_SEGMENT) {
            return Err(Error::invalid_identity(
                raw,
                "identity must start with the 'host/' segment",
            ));
        }

        let identity = &segments[1..];
        if identity.is_empty() || identity.iter().all(|s| s.is_empty()) {
            return Err(Error::invalid_identity(
                raw,
                "identity must contain at least one segment after 'host'",
            ));
        }
        if identity.iter().any(|s| s.is_empty()) {
            return Err(Error::invalid_identity(raw, "identity segments must not be empty"));
        }

        // Fewer than four segments: everything after `host` is the suffix.
        let split_at = segments.len().saturating_sub(SUFFIX_SEGMENTS).max(1);
        let prefix = segments[..split_at].join(".");
        let suffix = segments[split_at..].join(".");

        Ok(Self {
            full: raw.to_string(),
            prefix,
            suffix,
        })
    }

    /// The identity exactly as configured, e.g. `host/apps/ns/sa/pod`.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// Policy path, dot-joined and always starting with `host`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Leaf identity, dot-joined.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

//! Configuration management
//!
//! Layered with `figment`: built-in defaults, then an optional YAML file,
//! then `AUTHN_`-prefixed environment variables (nested keys split on `__`,
//! e.g. `AUTHN_RETRY__MAX_ATTEMPTS`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::tls::pem::read_pem_file;
use crate::{Error, Result};

/// Default location the broker writes the signed client certificate to.
pub const DEFAULT_CLIENT_CERT_PATH: &str = "/etc/authn/ssl/client.pem";
/// Default projected service account token.
pub const DEFAULT_JWT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
/// Default instance metadata identity endpoint.
pub const DEFAULT_GCP_METADATA_URL: &str =
    "http://metadata/computeMetadata/v1/instance/service-accounts/default/identity";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Authenticator URL, e.g. `https://broker/authn-k8s/my-cluster`
    pub authn_url: String,
    /// Broker account
    pub account: String,
    /// Host identity (`host/...`). Optional for the JWT and GCP strategies.
    pub authn_login: Option<String>,
    /// Explicit strategy (`authn-k8s`, `authn-jwt`, `authn-gcp`). When unset
    /// it is derived from `authn_url`.
    pub authn_type: Option<String>,
    /// Broker API version
    pub version: BrokerVersion,
    /// Broker CA bundle, PEM
    pub ssl_certificate: Option<String>,
    /// Broker CA bundle file, PEM (used when `ssl_certificate` is unset)
    pub ssl_certificate_path: Option<PathBuf>,
    /// Pod name (certificate strategy)
    pub pod_name: Option<String>,
    /// Pod namespace (certificate strategy)
    pub pod_namespace: Option<String>,
    /// Where the broker drops the signed client certificate
    pub client_cert_path: PathBuf,
    /// How many times to look for the client certificate after login
    pub client_cert_retry_count_limit: u32,
    /// Pause between client certificate lookups
    #[serde(with = "humantime_serde")]
    pub client_cert_poll_interval: Duration,
    /// Treat the client certificate as expired this long before `not_after`
    #[serde(with = "humantime_serde")]
    pub cert_expiry_buffer: Duration,
    /// Bearer token file (JWT strategy)
    pub jwt_token_path: PathBuf,
    /// Instance metadata identity endpoint (GCP strategy)
    pub gcp_metadata_url: String,
    /// Audience prefix requested from the metadata endpoint
    pub gcp_audience_prefix: String,
    /// Persist the access token to this file; in-memory when unset
    pub access_token_path: Option<PathBuf>,
    /// Pause between successful authentications
    #[serde(with = "humantime_serde")]
    pub token_refresh_interval: Duration,
    /// Per-request timeout for broker calls
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How the process is deployed next to the workload
    pub container_mode: ContainerMode,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            authn_url: String::new(),
            account: String::new(),
            authn_login: None,
            authn_type: None,
            version: BrokerVersion::default(),
            ssl_certificate: None,
            ssl_certificate_path: None,
            pod_name: None,
            pod_namespace: None,
            client_cert_path: PathBuf::from(DEFAULT_CLIENT_CERT_PATH),
            client_cert_retry_count_limit: 10,
            client_cert_poll_interval: Duration::from_secs(1),
            cert_expiry_buffer: Duration::from_secs(5),
            jwt_token_path: PathBuf::from(DEFAULT_JWT_TOKEN_PATH),
            gcp_metadata_url: DEFAULT_GCP_METADATA_URL.to_string(),
            gcp_audience_prefix: "conjur".to_string(),
            access_token_path: None,
            token_refresh_interval: Duration::from_secs(6 * 60),
            request_timeout: crate::tls::DEFAULT_REQUEST_TIMEOUT,
            container_mode: ContainerMode::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (AUTHN_ prefix)
        figment = figment.merge(Env::prefixed("AUTHN_").split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Broker CA bundle bytes, inline value first, then the file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when neither is set or the file is unreadable.
    pub fn ca_certificate(&self) -> Result<Vec<u8>> {
        if let Some(pem) = self.ssl_certificate.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(pem.as_bytes().to_vec());
        }
        match &self.ssl_certificate_path {
            Some(path) => read_pem_file(path),
            None => Err(Error::Config(
                "Either ssl_certificate or ssl_certificate_path must be set".to_string(),
            )),
        }
    }

    /// The configured host identity, treating an empty string as unset.
    pub fn login(&self) -> Option<&str> {
        self.authn_login.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Authenticator URL with any trailing `/` removed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the URL is missing or not https.
    pub fn authn_base_url(&self) -> Result<String> {
        let raw = self.authn_url.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Err(Error::Config("authn_url is required".to_string()));
        }
        let parsed = url::Url::parse(raw)
            .map_err(|e| Error::Config(format!("Invalid authn_url '{raw}': {e}")))?;
        if parsed.scheme() != "https" {
            return Err(Error::Config(format!(
                "authn_url '{raw}' must use https"
            )));
        }
        Ok(raw.to_string())
    }

    /// The broker account, required by every strategy.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when unset.
    pub fn require_account(&self) -> Result<&str> {
        let account = self.account.trim();
        if account.is_empty() {
            return Err(Error::Config("account is required".to_string()));
        }
        Ok(account)
    }
}

/// Broker API generation. Only the authenticate URL differs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrokerVersion {
    /// Legacy `/users/{identity}/authenticate`
    V4,
    /// Current `/{account}/{identity}/authenticate`
    #[default]
    V5,
}

impl BrokerVersion {
    /// Major version number.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V5 => 5,
        }
    }
}

impl FromStr for BrokerVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches(['v', 'V']) {
            "4" => Ok(Self::V4),
            "5" => Ok(Self::V5),
            other => Err(Error::Config(format!("Unsupported broker version '{other}'"))),
        }
    }
}

impl Serialize for BrokerVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

// Accepts `5`, `"5"` and `"v5"`; env vars arrive as numbers.
impl<'de> Deserialize<'de> for BrokerVersion {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Text(String),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Num(n) => n.to_string(),
            Raw::Text(s) => s,
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Deployment mode of the authenticator process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerMode {
    /// Init container: authenticate once and exit
    Init,
    /// Sidecar: keep the token fresh for the lifetime of the pod
    #[default]
    Sidecar,
    /// Embedded in the application process
    Application,
}

impl ContainerMode {
    /// Whether the process should stop after the first successful cycle.
    #[must_use]
    pub fn runs_once(self) -> bool {
        matches!(self, Self::Init)
    }
}

impl FromStr for ContainerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "init" => Ok(Self::Init),
            "sidecar" => Ok(Self::Sidecar),
            "application" => Ok(Self::Application),
            other => Err(Error::Config(format!("Unknown container mode '{other}'"))),
        }
    }
}

impl fmt::Display for ContainerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Sidecar => "sidecar",
            Self::Application => "application",
        })
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries
    pub enabled: bool,
    /// Maximum attempts per cycle (0 = bounded by `max_elapsed_time` only)
    pub max_attempts: u32,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
    /// Give up a cycle after this long
    #[serde(default, with = "humantime_serde::option")]
    pub max_elapsed_time: Option<Duration>,
    /// Abort a single attempt after this long
    #[serde(default, with = "humantime_serde::option")]
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(5 * 60)),
            attempt_timeout: None,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*duration))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawDuration::deserialize(deserializer)?;
        parse(&raw.into_string()).map_err(serde::de::Error::custom)
    }

    /// Numbers (seconds) and strings are both accepted; env vars arrive as
    /// numbers when they look like one.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Secs(u64),
        Text(String),
    }

    impl RawDuration {
        fn into_string(self) -> String {
            match self {
                Self::Secs(secs) => secs.to_string(),
                Self::Text(s) => s,
            }
        }
    }

    fn format(duration: Duration) -> String {
        if duration.subsec_nanos() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        }
    }

    /// Parse "30s", "5m", "1h", "100ms" or a bare number of seconds.
    ///
    /// # Errors
    ///
    /// Returns the parse error message for anything else.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parse_num = |n: &str| n.trim().parse::<u64>().map_err(|e| format!("invalid duration '{s}': {e}"));

        if let Some(ms) = s.strip_suffix("ms") {
            parse_num(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse_num(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(parse_num(mins)?, 60, s)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(parse_num(hours)?, 3600, s)
        } else {
            // Assume seconds
            parse_num(s).map(Duration::from_secs)
        }
    }

    fn scaled(value: u64, unit_secs: u64, raw: &str) -> Result<Duration, String> {
        value
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration '{raw}': out of range"))
    }

    /// `Option<Duration>` flavour
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the value cannot be parsed.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<super::RawDuration>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw.into_string()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

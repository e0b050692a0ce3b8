//! Immutable process configuration.
//!
//! Loaded once at startup and shared by `Arc`. The secret and destination URL
//! are mandatory; there is no fallback secret.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::outbox::RetryPolicy;
use crate::signing::{SecretKey, SigningError};

pub const ENV_HMAC_SECRET: &str = "LOTOLINK_HMAC_SECRET";
pub const ENV_WEBHOOK_URL: &str = "LOTOLINK_WEBHOOK_URL";
pub const ENV_TIMESTAMP_TOLERANCE_SECS: &str = "HOOKLINE_TIMESTAMP_TOLERANCE_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "HOOKLINE_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_MS: &str = "HOOKLINE_RETRY_BASE_MS";
pub const ENV_RETRY_MAX_MS: &str = "HOOKLINE_RETRY_MAX_MS";
pub const ENV_RETRY_JITTER: &str = "HOOKLINE_RETRY_JITTER";
pub const ENV_LEASE_TIMEOUT_SECS: &str = "HOOKLINE_LEASE_TIMEOUT_SECS";
pub const ENV_ATTEMPT_TIMEOUT_SECS: &str = "HOOKLINE_ATTEMPT_TIMEOUT_SECS";
pub const ENV_WORKERS: &str = "HOOKLINE_WORKERS";
pub const ENV_BATCH_SIZE: &str = "HOOKLINE_BATCH_SIZE";
pub const ENV_POLL_INTERVAL_MS: &str = "HOOKLINE_POLL_INTERVAL_MS";
pub const ENV_OUTBOX_PATH: &str = "HOOKLINE_OUTBOX_PATH";
pub const ENV_TERMINAL_RETENTION_SECS: &str = "HOOKLINE_TERMINAL_RETENTION_SECS";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {var}")]
    Missing { var: &'static str },

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl From<SigningError> for ConfigError {
    fn from(err: SigningError) -> Self {
        ConfigError::Invalid {
            var: ENV_HMAC_SECRET,
            reason: err.to_string(),
        }
    }
}

/// Delivery destination: full URL plus the path that gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    url: Url,
}

impl Destination {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
            var: ENV_WEBHOOK_URL,
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                var: ENV_WEBHOOK_URL,
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Path component covered by the signature (no query string).
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

#[derive(Debug, Clone)]
pub struct HooklineConfig {
    pub secret: SecretKey,
    pub destination: Destination,
    /// Accepted clock skew for inbound timestamps.
    pub timestamp_tolerance: Duration,
    pub retry: RetryPolicy,
    /// How long a worker may hold an event before the reaper reclaims it.
    pub lease_timeout: Duration,
    /// Upper bound on one HTTP attempt.
    pub attempt_timeout: Duration,
    pub workers: usize,
    pub batch_size: usize,
    /// Idle wait between empty leases.
    pub poll_interval: Duration,
    /// How long Delivered / Failed / Exhausted events are kept (and their ids
    /// deduplicated) before the reaper prunes them.
    pub terminal_retention: Duration,
    /// File-backed outbox when set, in-memory otherwise.
    pub outbox_path: Option<PathBuf>,
}

impl HooklineConfig {
    /// Configuration with documented defaults for everything optional.
    pub fn new(secret: SecretKey, destination: Destination) -> Self {
        Self {
            secret,
            destination,
            timestamp_tolerance: crate::replay::DEFAULT_TOLERANCE,
            retry: RetryPolicy::default(),
            lease_timeout: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(10),
            workers: 4,
            batch_size: 10,
            poll_interval: Duration::from_millis(500),
            terminal_retention: Duration::from_secs(24 * 60 * 60),
            outbox_path: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LOTOLINK_HMAC_SECRET`: shared HMAC secret
    /// - `LOTOLINK_WEBHOOK_URL`: http(s) URL events are POSTed to
    ///
    /// Optional (defaults in parentheses):
    /// - `HOOKLINE_TIMESTAMP_TOLERANCE_SECS` (120)
    /// - `HOOKLINE_MAX_ATTEMPTS` (5)
    /// - `HOOKLINE_RETRY_BASE_MS` (2000), `HOOKLINE_RETRY_MAX_MS` (600000)
    /// - `HOOKLINE_RETRY_JITTER` (0.1)
    /// - `HOOKLINE_LEASE_TIMEOUT_SECS` (60), `HOOKLINE_ATTEMPT_TIMEOUT_SECS` (10)
    /// - `HOOKLINE_WORKERS` (4), `HOOKLINE_BATCH_SIZE` (10)
    /// - `HOOKLINE_POLL_INTERVAL_MS` (500)
    /// - `HOOKLINE_TERMINAL_RETENTION_SECS` (86400)
    /// - `HOOKLINE_OUTBOX_PATH` (unset: in-memory outbox)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading through `lookup` (tests, layered sources).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        let secret = get(ENV_HMAC_SECRET).ok_or(ConfigError::Missing {
            var: ENV_HMAC_SECRET,
        })?;
        let url = get(ENV_WEBHOOK_URL).ok_or(ConfigError::Missing {
            var: ENV_WEBHOOK_URL,
        })?;

        let mut config = Self::new(SecretKey::new(secret)?, Destination::parse(&url)?);

        if let Some(secs) = parse_opt::<u64>(&get, ENV_TIMESTAMP_TOLERANCE_SECS)? {
            config.timestamp_tolerance = Duration::from_secs(secs);
        }
        if let Some(n) = parse_opt::<u32>(&get, ENV_MAX_ATTEMPTS)? {
            config.retry.max_attempts = n;
        }
        if let Some(ms) = parse_opt::<u64>(&get, ENV_RETRY_BASE_MS)? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_opt::<u64>(&get, ENV_RETRY_MAX_MS)? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(jitter) = parse_opt::<f64>(&get, ENV_RETRY_JITTER)? {
            config.retry.jitter = jitter;
        }
        if let Some(secs) = parse_opt::<u64>(&get, ENV_LEASE_TIMEOUT_SECS)? {
            config.lease_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_opt::<u64>(&get, ENV_ATTEMPT_TIMEOUT_SECS)? {
            config.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_opt::<usize>(&get, ENV_WORKERS)? {
            config.workers = n;
        }
        if let Some(n) = parse_opt::<usize>(&get, ENV_BATCH_SIZE)? {
            config.batch_size = n;
        }
        if let Some(ms) = parse_opt::<u64>(&get, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_opt::<u64>(&get, ENV_TERMINAL_RETENTION_SECS)? {
            config.terminal_retention = Duration::from_secs(secs);
        }
        config.outbox_path = get(ENV_OUTBOX_PATH).map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(invalid(ENV_MAX_ATTEMPTS, "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(invalid(ENV_RETRY_JITTER, "must be within 0.0..=1.0"));
        }
        // a zero delay would make a failed event immediately due again
        if self.retry.base_delay.is_zero() {
            return Err(invalid(ENV_RETRY_BASE_MS, "must be positive"));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(invalid(ENV_RETRY_MAX_MS, "must not be below the base delay"));
        }
        if self.timestamp_tolerance.is_zero() {
            return Err(invalid(ENV_TIMESTAMP_TOLERANCE_SECS, "must be positive"));
        }
        if self.workers == 0 {
            return Err(invalid(ENV_WORKERS, "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid(ENV_BATCH_SIZE, "must be at least 1"));
        }
        if self.attempt_timeout.is_zero() {
            return Err(invalid(ENV_ATTEMPT_TIMEOUT_SECS, "must be positive"));
        }
        // pruning an event the same instant it settles would let a late
        // duplicate enqueue deliver it twice
        if self.terminal_retention.is_zero() {
            return Err(invalid(ENV_TERMINAL_RETENTION_SECS, "must be positive"));
        }
        // a lease shorter than an attempt would be reaped mid-flight
        if self.lease_timeout <= self.attempt_timeout {
            return Err(invalid(
                ENV_LEASE_TIMEOUT_SECS,
                "must exceed the attempt timeout",
            ));
        }
        Ok(())
    }
}

fn invalid(var: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

fn parse_opt<T>(
    get: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(var)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

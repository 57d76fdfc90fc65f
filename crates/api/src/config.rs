//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `ORCHARD_BIND_ADDR` - Listen address (default: 0.0.0.0:8080)
//! - `ORCHARD_JWT_SECRET` - HS256 secret shared with the identity provider
//!   (default: insecure dev secret, with a warning)
//! - `ORCHARD_TOKEN_TTL_SECS` - Lifetime of refreshed tokens (default: 3600)
//! - `DATABASE_URL` - `PostgreSQL` connection string; unset selects the
//!   in-memory store
//! - `ORCHARD_MEMBERSHIP_TERM_DAYS` - Membership term (default: 365)
//! - `ORCHARD_MAX_CASCADE_PROFILES` - Archive cascade bound (default: 500)
//! - `ORCHARD_SWEEP_BATCH_SIZE` - Profiles per sweep pass (default: 200)
//! - `ORCHARD_SWEEP_INTERVAL_SECS` - Sweep cadence, `0` disables (default: 3600)
//! - `ORCHARD_CLAIMS_RETRY_ATTEMPTS` - Reconcile attempts (default: 3)
//! - `ORCHARD_EXPOSE_INTERNAL_ERRORS` - Detailed 500 bodies (default: false)
//! - `ORCHARD_LOG_FORMAT` - `json` or `pretty` (default: json)

use std::net::SocketAddr;
use std::time::Duration;

use orchard_infra::EngineConfig;
use orchard_observability::LogFormat;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const DEV_JWT_SECRET: &str = "orchard-dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: SecretString,
    pub token_ttl: chrono::Duration,
    /// `None` selects the in-memory store.
    pub database_url: Option<SecretString>,
    pub engine: EngineConfig,
    /// `None` disables the background sweep.
    pub sweep_interval: Option<Duration>,
    pub expose_internal_errors: bool,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr: SocketAddr = parse_or(&get, "ORCHARD_BIND_ADDR", "0.0.0.0:8080".parse().ok())?;

        let jwt_secret = SecretString::from(get("ORCHARD_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string()));

        let token_ttl_secs: i64 = parse_or(&get, "ORCHARD_TOKEN_TTL_SECS", Some(3600))?;
        if token_ttl_secs <= 0 {
            return Err(invalid("ORCHARD_TOKEN_TTL_SECS", "must be positive"));
        }
        let token_ttl = chrono::TimeDelta::try_seconds(token_ttl_secs)
            .ok_or_else(|| invalid("ORCHARD_TOKEN_TTL_SECS", "out of range"))?;

        let defaults = EngineConfig::default();
        let term_days: i64 = parse_or(&get, "ORCHARD_MEMBERSHIP_TERM_DAYS", Some(365))?;
        if term_days <= 0 {
            return Err(invalid("ORCHARD_MEMBERSHIP_TERM_DAYS", "must be positive"));
        }
        let membership_term = chrono::TimeDelta::try_days(term_days)
            .ok_or_else(|| invalid("ORCHARD_MEMBERSHIP_TERM_DAYS", "out of range"))?;
        let engine = EngineConfig {
            membership_term,
            max_cascade_profiles: parse_or(
                &get,
                "ORCHARD_MAX_CASCADE_PROFILES",
                Some(defaults.max_cascade_profiles),
            )?,
            sweep_batch_size: parse_or(&get, "ORCHARD_SWEEP_BATCH_SIZE", Some(defaults.sweep_batch_size))?,
            claims_retry_attempts: parse_or(
                &get,
                "ORCHARD_CLAIMS_RETRY_ATTEMPTS",
                Some(defaults.claims_retry_attempts),
            )?,
            ..defaults
        };

        let sweep_secs: u64 = parse_or(&get, "ORCHARD_SWEEP_INTERVAL_SECS", Some(3600))?;
        let log_format: LogFormat = match get("ORCHARD_LOG_FORMAT") {
            Some(raw) => raw
                .parse()
                .map_err(|e: orchard_observability::UnknownLogFormat| invalid("ORCHARD_LOG_FORMAT", e.to_string()))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            token_ttl,
            database_url: get("DATABASE_URL").map(SecretString::from),
            engine,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            expose_internal_errors: parse_or(&get, "ORCHARD_EXPOSE_INTERNAL_ERRORS", Some(false))?,
            log_format,
        })
    }

    /// Whether no `ORCHARD_JWT_SECRET` was given and the dev default is in use.
    pub fn uses_dev_jwt_secret(&self) -> bool {
        self.jwt_secret.expose_secret() == DEV_JWT_SECRET
    }

    /// In-memory configuration with the sweep disabled.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: SecretString::from(jwt_secret.to_string()),
            token_ttl: chrono::Duration::minutes(10),
            database_url: None,
            engine: EngineConfig {
                claims_retry_backoff: Duration::from_millis(1),
                ..EngineConfig::default()
            },
            sweep_interval: None,
            expose_internal_errors: true,
            log_format: LogFormat::Pretty,
        }
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(name, e.to_string())),
        None => default.ok_or_else(|| invalid(name, "required")),
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnvVar(name.to_string(), reason.into())
}

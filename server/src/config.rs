//! Server configuration module.
//!
//! This module provides configuration loading for the admission gate from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `GATE_ISSUER`: expected `iss` claim (required)
//! - `GATE_AUDIENCE`: expected `aud` claim (required)
//! - `GATE_JWKS_URL`: the issuer's JWKS endpoint (required)
//! - `GATE_LISTEN_PORT`: port to listen on (default: `8080`)
//! - `GATE_ALLOWED_ALGORITHMS`: comma-separated allow-list (default: `RS256`)
//! - `GATE_CLOCK_SKEW_SECS`: clock skew tolerance (default: `60`)
//! - `GATE_SCOPE_CLAIM`: claim carrying scopes (default: `scp`)
//! - `GATE_ROLES_CLAIM`: claim carrying roles (default: `roles`)
//! - `GATE_REQUIRE_AUTHENTICATION`: require a token on unlisted routes (default: `false`)
//! - `GATE_JWKS_REFRESH_INTERVAL_SECS`: periodic refresh interval (default: `300`)
//! - `GATE_JWKS_MIN_REFRESH_INTERVAL_SECS`: refresh coalescing window (default: `30`)
//! - `GATE_JWKS_FETCH_TIMEOUT_MS`: per-attempt fetch timeout (default: `5000`)
//! - `GATE_JWKS_MAX_ATTEMPTS`: fetch attempts per refresh (default: `3`)
//! - `GATE_UNKNOWN_KEY_WAIT_MS`: request wait after an unknown `kid` (default: `1000`)
//!
//! # Invariants
//!
//! - `listen_port` is always a valid port number (1-65535)
//! - The validation policy never allows `none`
//! - `refresh.max_attempts` is at least 1

use std::str::FromStr;
use std::time::Duration;

use crate::access::{Access, AccessPolicy};
use crate::auth::policy::DEFAULT_CLOCK_SKEW_SECS;
use crate::auth::{DEFAULT_UNKNOWN_KEY_WAIT, ValidationPolicy};
use crate::keys::RefreshConfig;

const ISSUER: &str = "GATE_ISSUER";
const AUDIENCE: &str = "GATE_AUDIENCE";
const JWKS_URL: &str = "GATE_JWKS_URL";
const LISTEN_PORT: &str = "GATE_LISTEN_PORT";
const ALLOWED_ALGORITHMS: &str = "GATE_ALLOWED_ALGORITHMS";
const CLOCK_SKEW_SECS: &str = "GATE_CLOCK_SKEW_SECS";
const SCOPE_CLAIM: &str = "GATE_SCOPE_CLAIM";
const ROLES_CLAIM: &str = "GATE_ROLES_CLAIM";
const REQUIRE_AUTHENTICATION: &str = "GATE_REQUIRE_AUTHENTICATION";
const REFRESH_INTERVAL_SECS: &str = "GATE_JWKS_REFRESH_INTERVAL_SECS";
const MIN_REFRESH_INTERVAL_SECS: &str = "GATE_JWKS_MIN_REFRESH_INTERVAL_SECS";
const FETCH_TIMEOUT_MS: &str = "GATE_JWKS_FETCH_TIMEOUT_MS";
const MAX_ATTEMPTS: &str = "GATE_JWKS_MAX_ATTEMPTS";
const UNKNOWN_KEY_WAIT_MS: &str = "GATE_UNKNOWN_KEY_WAIT_MS";

/// Server configuration.
///
/// Contains all configuration parameters needed to run the admission gate.
///
/// # Pre-conditions
///
/// When constructed via `from_env()`:
/// - All required environment variables must be set
/// - All values must be valid for their respective types
///
/// # Post-conditions
///
/// - `policy` is a valid validation policy
/// - `refresh` has at least one fetch attempt
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Token validation policy: issuer, audience, algorithms, skew, claim names.
    pub policy: ValidationPolicy,
    /// The issuer's JWKS endpoint.
    pub jwks_url: String,
    /// Port to listen on for HTTP requests.
    pub listen_port: u16,
    /// Whether routes without an explicit rule need a token.
    pub require_authentication: bool,
    /// Key set refresh settings.
    pub refresh: RefreshConfig,
    /// How long a request waits for a refresh after an unknown `kid`.
    pub unknown_key_wait: Duration,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    fn invalid(name: &str, message: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

impl ServerConfig {
    /// Default port for the server.
    pub const DEFAULT_PORT: u16 = 8080;
    /// Default algorithm allow-list.
    pub const DEFAULT_ALGORITHMS: &'static str = "RS256";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty, or if
    /// any variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// Same as `from_env`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let issuer = required(&lookup, ISSUER)?;
        let audience = required(&lookup, AUDIENCE)?;
        let jwks_url = required(&lookup, JWKS_URL)?;
        if !(jwks_url.starts_with("http://") || jwks_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                JWKS_URL,
                format!("'{jwks_url}' is not an http(s) URL"),
            ));
        }

        let listen_port = match lookup(LISTEN_PORT) {
            Some(value) => match value.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(ConfigError::invalid(
                        LISTEN_PORT,
                        format!("'{value}' is not a valid port number (must be 1-65535)"),
                    ));
                }
            },
            None => Self::DEFAULT_PORT,
        };

        let algorithms =
            lookup(ALLOWED_ALGORITHMS).unwrap_or_else(|| Self::DEFAULT_ALGORITHMS.to_string());
        let clock_skew = parsed(&lookup, CLOCK_SKEW_SECS, DEFAULT_CLOCK_SKEW_SECS)?;

        let mut policy = ValidationPolicy::new(issuer, audience)
            .and_then(|policy| {
                policy.with_algorithms(
                    algorithms
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty()),
                )
            })
            .map_err(|e| ConfigError::invalid(ALLOWED_ALGORITHMS, e))?
            .with_clock_skew(clock_skew);
        if let Some(claim) = lookup(SCOPE_CLAIM) {
            policy = policy
                .with_scope_claim(claim)
                .map_err(|e| ConfigError::invalid(SCOPE_CLAIM, e))?;
        }
        if let Some(claim) = lookup(ROLES_CLAIM) {
            policy = policy
                .with_roles_claim(claim)
                .map_err(|e| ConfigError::invalid(ROLES_CLAIM, e))?;
        }

        let require_authentication = match lookup(REQUIRE_AUTHENTICATION) {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::invalid(REQUIRE_AUTHENTICATION, format!("'{value}' is not a boolean"))
            })?,
            None => false,
        };

        let defaults = RefreshConfig::default();
        let max_attempts: u32 = parsed(&lookup, MAX_ATTEMPTS, defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::invalid(MAX_ATTEMPTS, "must be at least 1"));
        }
        let refresh = RefreshConfig {
            refresh_interval: Duration::from_secs(parsed(
                &lookup,
                REFRESH_INTERVAL_SECS,
                defaults.refresh_interval.as_secs(),
            )?),
            min_refresh_interval: Duration::from_secs(parsed(
                &lookup,
                MIN_REFRESH_INTERVAL_SECS,
                defaults.min_refresh_interval.as_secs(),
            )?),
            fetch_timeout: Duration::from_millis(parsed(
                &lookup,
                FETCH_TIMEOUT_MS,
                millis(defaults.fetch_timeout),
            )?),
            max_attempts,
            initial_backoff: defaults.initial_backoff,
        };
        if refresh.refresh_interval.is_zero() {
            return Err(ConfigError::invalid(REFRESH_INTERVAL_SECS, "must be positive"));
        }
        if refresh.fetch_timeout.is_zero() {
            return Err(ConfigError::invalid(FETCH_TIMEOUT_MS, "must be positive"));
        }

        let unknown_key_wait = Duration::from_millis(parsed(
            &lookup,
            UNKNOWN_KEY_WAIT_MS,
            millis(DEFAULT_UNKNOWN_KEY_WAIT),
        )?);

        Ok(Self {
            policy,
            jwks_url,
            listen_port,
            require_authentication,
            refresh,
            unknown_key_wait,
        })
    }

    /// Route access rules, with unlisted routes open or protected according
    /// to `require_authentication`.
    #[must_use]
    pub fn access_policy(&self) -> AccessPolicy {
        let fallback = if self.require_authentication {
            Access::Authenticated
        } else {
            Access::Anonymous
        };
        AccessPolicy::course_service(fallback)
    }
}

/// Load a required, non-empty variable.
fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(name, "must not be empty"));
    }
    Ok(value)
}

/// Parse an optional variable, falling back to `default` when unset.
fn parsed<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::invalid(name, format!("'{value}' is not a valid number"))),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

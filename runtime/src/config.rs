//! Configuration for breakers, rate limits, the retry queue and the server.
//!
//! Loaded from a TOML document or from `TURNSTILE_*` environment variables,
//! falling back to defaults for anything not set.
//!
//! # Example
//!
//! ```
//! use turnstile_runtime::config::AdmissionConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AdmissionConfig::from_toml_str(r#"
//!     [breakers.email]
//!     failure_threshold = 2
//!     reset_timeout_ms = 5000
//!
//!     [rate_limits.authentication]
//!     window_ms = 60000
//!     max_requests = 10
//! "#)?;
//!
//! assert_eq!(config.breakers.email.failure_threshold, 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Environment variables
//!
//! | variable | field |
//! |---|---|
//! | `TURNSTILE_CONFIG` | path of a TOML file to start from |
//! | `TURNSTILE_BIND_ADDRESS` | `server.bind_address` |
//! | `TURNSTILE_METRICS_ENABLED` | `server.metrics_enabled` |
//! | `TURNSTILE_{PAYMENT,EMAIL,DATABASE}_FAILURE_THRESHOLD` | `breakers.*.failure_threshold` |
//! | `TURNSTILE_{PAYMENT,EMAIL,DATABASE}_RESET_TIMEOUT_MS` | `breakers.*.reset_timeout_ms` |
//! | `TURNSTILE_RETRY_QUEUE_CAPACITY` | `retry_queue.capacity` |
//! | `TURNSTILE_RETRY_QUEUE_MAX_ATTEMPTS` | `retry_queue.max_attempts` |
//! | `TURNSTILE_RETRY_QUEUE_DRAIN_INTERVAL_MS` | `retry_queue.drain_interval_ms` |

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::rate_limiter::{ProtectedSurface, RateLimiterConfig, RateLimiters};
use crate::registry::{self, CircuitBreakerRegistry, DEFAULT_FEED_LIMIT};
use crate::retry_queue::{OverflowPolicy, RetryQueueConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use turnstile_core::environment::Clock;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// Config document is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// Environment variable holds an unparsable value
    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Complete admission-control configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Circuit breaker settings
    pub breakers: BreakersConfig,
    /// Per-surface rate limits
    pub rate_limits: RateLimitsConfig,
    /// Email retry queue settings
    pub retry_queue: RetryQueueSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_address: String,
    /// Whether to install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            metrics_enabled: true,
        }
    }
}

/// Settings for one circuit breaker.
///
/// Keys missing from a breaker table keep that breaker's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSettings {
    /// Failures before opening
    pub failure_threshold: u32,
    /// Time in OPEN before a probe, in milliseconds
    pub reset_timeout_ms: u64,
    /// Probe successes needed to close
    pub success_threshold: u32,
    /// Transitions kept in the breaker's history
    pub history_limit: usize,
    /// An open critical breaker reports the service unhealthy
    pub critical: bool,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout_ms: u64::try_from(config.reset_timeout.as_millis()).unwrap_or(u64::MAX),
            success_threshold: config.success_threshold,
            history_limit: config.history_limit,
            critical: config.critical,
        }
    }
}

impl BreakerSettings {
    /// Breaker configuration for these settings.
    #[must_use]
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_threshold(self.failure_threshold)
            .reset_timeout(Duration::from_millis(self.reset_timeout_ms))
            .success_threshold(self.success_threshold)
            .history_limit(self.history_limit)
            .critical(self.critical)
            .build()
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid(format!("breakers.{name}.failure_threshold must be > 0")));
        }
        if self.success_threshold == 0 {
            return Err(invalid(format!("breakers.{name}.success_threshold must be > 0")));
        }
        if self.reset_timeout_ms == 0 {
            return Err(invalid(format!("breakers.{name}.reset_timeout_ms must be > 0")));
        }
        if self.history_limit == 0 {
            return Err(invalid(format!("breakers.{name}.history_limit must be > 0")));
        }
        Ok(())
    }
}

/// Settings for the dependency breakers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BreakersDocument")]
pub struct BreakersConfig {
    /// Payment gateway breaker
    pub payment: BreakerSettings,
    /// Email delivery breaker
    pub email: BreakerSettings,
    /// Database breaker
    pub database: BreakerSettings,
    /// Transitions kept in the registry-wide feed
    pub feed_limit: usize,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        let [payment, email, database] = registry::default_breakers();
        Self {
            payment: BreakerSettings::from(&payment.1),
            email: BreakerSettings::from(&email.1),
            database: BreakerSettings::from(&database.1),
            feed_limit: DEFAULT_FEED_LIMIT,
        }
    }
}

impl BreakersConfig {
    fn named(&self) -> [(&'static str, &BreakerSettings); 3] {
        [
            (registry::PAYMENT, &self.payment),
            (registry::EMAIL, &self.email),
            (registry::DATABASE, &self.database),
        ]
    }

    fn named_mut(&mut self) -> [(&'static str, &mut BreakerSettings); 3] {
        [
            (registry::PAYMENT, &mut self.payment),
            (registry::EMAIL, &mut self.email),
            (registry::DATABASE, &mut self.database),
        ]
    }

    /// Build the breaker registry.
    #[must_use]
    pub fn build_registry(&self, clock: Arc<dyn Clock>) -> CircuitBreakerRegistry {
        let mut registry = CircuitBreakerRegistry::with_clock(clock).with_feed_limit(self.feed_limit);
        for (name, settings) in self.named() {
            registry.register(name, settings.to_config());
        }
        registry
    }
}

/// Breaker tables as written in a config document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BreakersDocument {
    payment: BreakerPatch,
    email: BreakerPatch,
    database: BreakerPatch,
    feed_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BreakerPatch {
    failure_threshold: Option<u32>,
    reset_timeout_ms: Option<u64>,
    success_threshold: Option<u32>,
    history_limit: Option<usize>,
    critical: Option<bool>,
}

impl BreakerPatch {
    fn apply(self, base: BreakerSettings) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            reset_timeout_ms: self.reset_timeout_ms.unwrap_or(base.reset_timeout_ms),
            success_threshold: self.success_threshold.unwrap_or(base.success_threshold),
            history_limit: self.history_limit.unwrap_or(base.history_limit),
            critical: self.critical.unwrap_or(base.critical),
        }
    }
}

impl From<BreakersDocument> for BreakersConfig {
    fn from(document: BreakersDocument) -> Self {
        let defaults = Self::default();
        Self {
            payment: document.payment.apply(defaults.payment),
            email: document.email.apply(defaults.email),
            database: document.database.apply(defaults.database),
            feed_limit: document.feed_limit.unwrap_or(defaults.feed_limit),
        }
    }
}

/// Window and budget of one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per key and window
    pub max_requests: u32,
}

/// Per-surface rate limit overrides.
///
/// Surfaces without an entry use their built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitsConfig {
    overrides: BTreeMap<ProtectedSurface, LimitSettings>,
}

impl RateLimitsConfig {
    /// Override one surface.
    pub fn set(&mut self, surface: ProtectedSurface, settings: LimitSettings) {
        self.overrides.insert(surface, settings);
    }

    /// Effective limiter configuration for a surface.
    #[must_use]
    pub fn limiter_config(&self, surface: ProtectedSurface) -> RateLimiterConfig {
        let defaults = surface.default_config();
        self.overrides.get(&surface).map_or(defaults, |settings| RateLimiterConfig {
            window: Duration::from_millis(settings.window_ms),
            max_requests: settings.max_requests,
            ..defaults
        })
    }

    /// Build one limiter per surface.
    #[must_use]
    pub fn build_limiters(&self, clock: &Arc<dyn Clock>) -> RateLimiters {
        RateLimiters::new(clock, |surface| self.limiter_config(surface))
    }
}

/// Retry queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryQueueSettings {
    /// Maximum queued messages
    pub capacity: usize,
    /// Attempts before dead-lettering
    pub max_attempts: u32,
    /// Background drain period in milliseconds
    pub drain_interval_ms: u64,
    /// Behaviour at capacity
    pub overflow: OverflowPolicy,
    /// Entries kept in the dead-letter log
    pub dead_letter_limit: usize,
}

impl Default for RetryQueueSettings {
    fn default() -> Self {
        let defaults = RetryQueueConfig::default();
        Self {
            capacity: defaults.capacity,
            max_attempts: defaults.max_attempts,
            drain_interval_ms: u64::try_from(defaults.drain_interval.as_millis())
                .unwrap_or(u64::MAX),
            overflow: defaults.overflow,
            dead_letter_limit: defaults.dead_letter_limit,
        }
    }
}

impl RetryQueueSettings {
    /// Queue configuration for these settings.
    #[must_use]
    pub const fn to_config(&self) -> RetryQueueConfig {
        RetryQueueConfig {
            capacity: self.capacity,
            max_attempts: self.max_attempts,
            drain_interval: Duration::from_millis(self.drain_interval_ms),
            overflow: self.overflow,
            dead_letter_limit: self.dead_letter_limit,
        }
    }
}

impl AdmissionConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML or mistyped values and
    /// `ConfigError::Validation` if the result fails [`validate`](Self::validate).
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read, otherwise the
    /// errors of [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&document)?)
    }

    /// Load from `TURNSTILE_*` environment variables and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if `TURNSTILE_CONFIG` names an unreadable or invalid
    /// file, a variable cannot be parsed, or the result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("TURNSTILE_CONFIG") {
            // Validated once env overrides are applied.
            Some(path) => Self::parse_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(address) = lookup("TURNSTILE_BIND_ADDRESS") {
            self.server.bind_address = address;
        }
        override_parsed(lookup, "TURNSTILE_METRICS_ENABLED", &mut self.server.metrics_enabled)?;

        for (name, settings) in self.breakers.named_mut() {
            let prefix = format!("TURNSTILE_{}", name.to_uppercase());
            override_parsed(
                lookup,
                &format!("{prefix}_FAILURE_THRESHOLD"),
                &mut settings.failure_threshold,
            )?;
            override_parsed(
                lookup,
                &format!("{prefix}_RESET_TIMEOUT_MS"),
                &mut settings.reset_timeout_ms,
            )?;
        }

        let queue = &mut self.retry_queue;
        override_parsed(lookup, "TURNSTILE_RETRY_QUEUE_CAPACITY", &mut queue.capacity)?;
        override_parsed(lookup, "TURNSTILE_RETRY_QUEUE_MAX_ATTEMPTS", &mut queue.max_attempts)?;
        override_parsed(
            lookup,
            "TURNSTILE_RETRY_QUEUE_DRAIN_INTERVAL_MS",
            &mut queue.drain_interval_ms,
        )?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| invalid(format!("server.bind_address: {e}")))?;

        for (name, settings) in self.breakers.named() {
            settings.validate(name)?;
        }
        if self.breakers.feed_limit == 0 {
            return Err(invalid("breakers.feed_limit must be > 0"));
        }

        for surface in ProtectedSurface::ALL {
            if self.rate_limits.limiter_config(surface).window.is_zero() {
                return Err(invalid(format!("rate_limits.{surface}.window_ms must be > 0")));
            }
        }

        self.retry_queue.to_config().validate()
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(var) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        })?;
    }
    Ok(())
}

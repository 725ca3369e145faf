//! Poller configuration and validation.
//!
//! Configuration can be built in code, parsed from TOML, and overlaid
//! from environment variables. Validation runs before a poller is built
//! so bad intervals are caught early.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding `base_interval_ms`.
pub const ENV_BASE_INTERVAL_MS: &str = "POLLER_BASE_INTERVAL_MS";
/// Environment variable overriding `max_backoff_multiplier`.
pub const ENV_MAX_BACKOFF_MULTIPLIER: &str = "POLLER_MAX_BACKOFF_MULTIPLIER";
/// Environment variable overriding `fetch_timeout_ms`.
pub const ENV_FETCH_TIMEOUT_MS: &str = "POLLER_FETCH_TIMEOUT_MS";

/// Construction-time poller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Nominal polling period in milliseconds.
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,

    /// Ceiling on the interval growth factor.
    #[serde(default = "default_max_backoff_multiplier")]
    pub max_backoff_multiplier: u32,

    /// Deadline for a single fetch, in milliseconds.
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,

    /// Whether the consumer is considered visible before the first signal.
    #[serde(default = "default_start_visible")]
    pub start_visible: bool,
}

fn default_base_interval_ms() -> u64 {
    60_000
}

fn default_max_backoff_multiplier() -> u32 {
    8
}

fn default_start_visible() -> bool {
    true
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            max_backoff_multiplier: default_max_backoff_multiplier(),
            fetch_timeout_ms: None,
            start_visible: default_start_visible(),
        }
    }
}

impl PollerConfig {
    /// Creates a configuration with the given base interval and backoff ceiling.
    pub fn new(base_interval: Duration, max_backoff_multiplier: u32) -> Self {
        Self {
            base_interval_ms: base_interval.as_millis() as u64,
            max_backoff_multiplier,
            ..Self::default()
        }
    }

    /// Sets the per-fetch deadline.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Sets the initial visibility.
    pub fn with_start_visible(mut self, visible: bool) -> Self {
        self.start_visible = visible;
        self
    }

    /// Returns the base interval as a Duration.
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    /// Returns the per-fetch deadline, if any.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the slowest interval the poller can back off to.
    pub fn max_interval(&self) -> Duration {
        self.base_interval()
            .saturating_mul(self.max_backoff_multiplier.max(1))
    }

    /// Parses and validates a TOML configuration.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| Error::TomlParse {
            path: "<inline>".into(),
            reason: e.to_string(),
        })?;
        config.checked()
    }

    /// Loads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents).map_err(|e| Error::TomlParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.checked()
    }

    /// Overlays values from `POLLER_*` environment variables.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_BASE_INTERVAL_MS) {
            self.base_interval_ms = parse_var(ENV_BASE_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BACKOFF_MULTIPLIER) {
            self.max_backoff_multiplier = parse_var(ENV_MAX_BACKOFF_MULTIPLIER, &value)?;
        }
        if let Some(value) = lookup(ENV_FETCH_TIMEOUT_MS) {
            self.fetch_timeout_ms = Some(parse_var(ENV_FETCH_TIMEOUT_MS, &value)?);
        }
        self.checked()
    }

    fn checked(self) -> Result<Self> {
        let warnings = self.validate().into_result()?;
        for warning in warnings {
            tracing::warn!(warning = %warning, "poller configuration warning");
        }
        Ok(self)
    }
}

fn parse_var<N: std::str::FromStr>(key: &str, value: &str) -> Result<N> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for PollerConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.base_interval_ms == 0 {
            result.add_error("base_interval_ms must be positive");
        } else if self.base_interval_ms < 1000 {
            result.add_warning("base_interval_ms under 1 second may overload the backend");
        }

        if self.max_backoff_multiplier == 0 {
            result.add_error("max_backoff_multiplier must be at least 1");
        } else if !self.max_backoff_multiplier.is_power_of_two() {
            result.add_warning(format!(
                "max_backoff_multiplier {} is not a power of two; the last step is capped",
                self.max_backoff_multiplier
            ));
        }

        match self.fetch_timeout_ms {
            Some(0) => result.add_error("fetch_timeout_ms must be positive when set"),
            Some(timeout) if self.base_interval_ms > 0 && timeout >= self.base_interval_ms => {
                result.add_warning(
                    "fetch_timeout_ms at or above base_interval_ms lets slow fetches swallow timer ticks",
                );
            }
            _ => {}
        }

        result
    }
}

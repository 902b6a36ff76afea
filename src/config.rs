//! Layered configuration: defaults, optional TOML file, then environment
//!
//! Environment overrides use the `CONTEXT_WINDOW` prefix with `__` between
//! sections, e.g. `CONTEXT_WINDOW__TOKEN_BUDGET__MAX_TOKENS=2000`.

use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};

pub use crate::context::token_budget::TokenBudgetConfig;

/// Default configuration file, looked up relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/context-window";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CONTEXT_WINDOW";

/// Longest accepted record lifetime: one year
pub const MAX_EXPIRATION_MINUTES: i64 = 365 * 24 * 60;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub token_budget: TokenBudgetConfig,

    #[serde(default)]
    pub window_cache: WindowCacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Window cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCacheConfig {
    /// Record lifetime
    #[serde(default = "default_expiration_minutes")]
    pub expiration_minutes: i64,

    /// Period of the background expiry sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_expiration_minutes() -> i64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl WindowCacheConfig {
    pub fn ttl(&self) -> Result<chrono::Duration> {
        chrono::Duration::try_minutes(self.expiration_minutes)
            .filter(|_| (1..=MAX_EXPIRATION_MINUTES).contains(&self.expiration_minutes))
            .ok_or_else(|| {
                ContextError::Configuration(format!(
                    "window_cache.expiration_minutes must be in 1..={}, got {}",
                    MAX_EXPIRATION_MINUTES, self.expiration_minutes
                ))
            })
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for WindowCacheConfig {
    fn default() -> Self {
        Self {
            expiration_minutes: default_expiration_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from the default file location (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::from_file(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` (if present) and the environment
    pub fn from_file(path: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document, without environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration is consistent
    pub fn validate(&self) -> Result<()> {
        self.token_budget.validate()?;
        self.window_cache.ttl()?;
        if self.window_cache.sweep_interval_secs == 0 {
            return Err(ContextError::Configuration(
                "window_cache.sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

//! Server configuration
//!
//! Provides ServerConfig with a validating builder. Values come from the
//! command line first, then the environment, then the defaults below.

use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable naming the compiler executable
pub const COMPILER_PATH_ENV: &str = "LPYTHON_PATH";

/// Compiler used when nothing else is configured
pub const DEFAULT_COMPILER_PATH: &str = "lpython";

/// Default cooldown between validations of one document (500 ms)
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Longest allowed cooldown (1 minute)
pub const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Default limit for one compiler run (30 seconds)
pub const DEFAULT_COMPILER_TIMEOUT_SECS: u64 = 30;

/// Longest allowed compiler run (10 minutes)
pub const MAX_COMPILER_TIMEOUT_SECS: u64 = 600;

/// Default timeout for requests sent to the editor (10 seconds)
///
/// Covers `workspace/configuration`; a client that never answers falls
/// back to default settings after this long.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Errors
// ============================================================================

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid compiler path
    #[error("Invalid compiler path: {path:?} - {reason}")]
    InvalidCompilerPath { path: String, reason: String },

    /// Invalid duration value
    #[error("Invalid {name}: {value:?} - {reason}")]
    InvalidDuration {
        name: &'static str,
        value: Duration,
        reason: String,
    },
}

impl ConfigError {
    fn invalid_duration(name: &'static str, value: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            name,
            value,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Complete server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Compiler executable used when the editor does not override it
    pub compiler_path: String,

    /// Cooldown of the per-document validation trigger
    pub debounce: Duration,

    /// Limit for a single compiler run
    pub compiler_timeout: Duration,

    /// Limit for requests sent to the editor
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            compiler_path: DEFAULT_COMPILER_PATH.to_string(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            compiler_timeout: Duration::from_secs(DEFAULT_COMPILER_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for ServerConfig with validation and defaults
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    compiler_path: Option<String>,
    debounce: Option<Duration>,
    compiler_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compiler executable
    pub fn compiler_path(mut self, path: impl Into<String>) -> Self {
        self.compiler_path = Some(path.into());
        self
    }

    /// Fill the compiler path from the environment unless already set
    pub fn compiler_path_from_env(self) -> Self {
        let from_env = std::env::var(COMPILER_PATH_ENV).ok();
        self.compiler_path_fallback(from_env)
    }

    fn compiler_path_fallback(mut self, path: Option<String>) -> Self {
        if self.compiler_path.is_none() {
            self.compiler_path = path;
        }
        self
    }

    /// Set the validation cooldown
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    /// Set the compiler run limit
    pub fn compiler_timeout(mut self, timeout: Duration) -> Self {
        self.compiler_timeout = Some(timeout);
        self
    }

    /// Set the client request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let default = ServerConfig::default();

        let config = ServerConfig {
            compiler_path: self.compiler_path.unwrap_or(default.compiler_path),
            debounce: self.debounce.unwrap_or(default.debounce),
            compiler_timeout: self.compiler_timeout.unwrap_or(default.compiler_timeout),
            request_timeout: self.request_timeout.unwrap_or(default.request_timeout),
        };

        Self::validate_compiler_path(&config.compiler_path)?;
        Self::validate_durations(&config)?;

        Ok(config)
    }

    /// Validate compiler executable path
    fn validate_compiler_path(path: &str) -> Result<(), ConfigError> {
        let reason = if path.trim().is_empty() {
            "Compiler path cannot be empty"
        } else if path.contains('\0') {
            "Compiler path contains null character"
        } else {
            // Existence is checked on every run; the editor may override it anyway
            return Ok(());
        };

        Err(ConfigError::InvalidCompilerPath {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Validate duration values
    fn validate_durations(config: &ServerConfig) -> Result<(), ConfigError> {
        if config.debounce < Duration::from_millis(1) {
            return Err(ConfigError::invalid_duration(
                "debounce",
                config.debounce,
                "Debounce must be at least 1 ms",
            ));
        }

        if config.debounce > Duration::from_millis(MAX_DEBOUNCE_MS) {
            return Err(ConfigError::invalid_duration(
                "debounce",
                config.debounce,
                "Debounce too long (max 1 minute)",
            ));
        }

        if config.compiler_timeout < Duration::from_secs(1) {
            return Err(ConfigError::invalid_duration(
                "compiler timeout",
                config.compiler_timeout,
                "Compiler timeout must be at least 1 second",
            ));
        }

        if config.compiler_timeout > Duration::from_secs(MAX_COMPILER_TIMEOUT_SECS) {
            return Err(ConfigError::invalid_duration(
                "compiler timeout",
                config.compiler_timeout,
                "Compiler timeout too long (max 10 minutes)",
            ));
        }

        if config.request_timeout.is_zero() {
            return Err(ConfigError::invalid_duration(
                "request timeout",
                config.request_timeout,
                "Request timeout must be greater than zero",
            ));
        }

        Ok(())
    }
}

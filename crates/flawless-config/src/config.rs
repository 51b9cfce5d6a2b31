//! Root configuration type.

use serde::{Deserialize, Serialize};

use crate::{
    ConfigError, CorsSection, CsrfSection, DispatcherConfig, LoggingSection, RateLimitSection,
};

/// Complete dispatcher configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and environment
/// variables on top of the defaults.
///
/// # Example
///
/// ```
/// use flawless_config::FlawlessConfig;
///
/// let config = FlawlessConfig::default();
/// assert_eq!(config.dispatcher.cache_capacity, 2000);
/// assert!(!config.rate_limit.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct FlawlessConfig {
    /// Route cache and per-request settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// CORS unit.
    #[serde(default)]
    pub cors: CorsSection,

    /// Rate limit unit.
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// CSRF unit.
    #[serde(default)]
    pub csrf: CsrfSection,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl FlawlessConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> FlawlessConfigBuilder {
        FlawlessConfigBuilder::new()
    }

    /// Checks values serde cannot check on its own.
    ///
    /// Rejects a zero cache capacity, a zero rate-limit capacity or window,
    /// an unparseable rate-limit key, credentials combined with a wildcard
    /// origin, and an invalid log filter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.cache_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "dispatcher.cache_capacity",
                "must be at least 1",
            ));
        }

        if self.dispatcher.cache_ttl_secs == Some(0) {
            return Err(ConfigError::invalid_value(
                "dispatcher.cache_ttl_secs",
                "must be at least 1 when set",
            ));
        }

        if self.dispatcher.request_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(
                "dispatcher.request_timeout_ms",
                "must be at least 1 when set",
            ));
        }

        if self.rate_limit.capacity == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.capacity",
                "must be at least 1",
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.window_secs",
                "must be at least 1",
            ));
        }

        validate_rate_key(&self.rate_limit.key)?;

        if self.cors.allow_credentials && self.cors.allows_any_origin() {
            return Err(ConfigError::validation_error(
                "cors.allow_credentials cannot be combined with the '*' origin",
            ));
        }

        if self.csrf.header_name.trim().is_empty() {
            return Err(ConfigError::invalid_value("csrf.header_name", "must not be empty"));
        }

        if self.csrf.token_ttl_secs == 0 {
            return Err(ConfigError::invalid_value(
                "csrf.token_ttl_secs",
                "must be at least 1",
            ));
        }

        flawless_telemetry::create_env_filter(&self.logging.level)
            .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;

        Ok(())
    }

    /// Debug logging in pretty format.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LoggingSection {
                level: "debug".to_string(),
                format: flawless_telemetry::LogFormat::Pretty,
            },
            ..Self::default()
        }
    }

    /// JSON logging with the built-in rate limiter and CSRF check switched on.
    #[must_use]
    pub fn production() -> Self {
        Self {
            rate_limit: RateLimitSection {
                enabled: true,
                ..RateLimitSection::default()
            },
            csrf: CsrfSection {
                enabled: true,
                ..CsrfSection::default()
            },
            ..Self::default()
        }
    }
}

fn validate_rate_key(key: &str) -> Result<(), ConfigError> {
    match key {
        "ip" | "global" => Ok(()),
        other => match other
            .strip_prefix("header:")
            .or_else(|| other.strip_prefix("value:"))
        {
            Some(name) if !name.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::invalid_value(
                "rate_limit.key",
                format!("expected 'ip', 'global', 'header:<name>' or 'value:<key>', got '{other}'"),
            )),
        },
    }
}

/// Builder for [`FlawlessConfig`].
#[derive(Debug, Default)]
pub struct FlawlessConfigBuilder {
    config: FlawlessConfig,
}

impl FlawlessConfigBuilder {
    /// Starts from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dispatcher section.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.config.dispatcher = dispatcher;
        self
    }

    /// Sets the CORS section.
    #[must_use]
    pub fn cors(mut self, cors: CorsSection) -> Self {
        self.config.cors = cors;
        self
    }

    /// Sets the rate limit section.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitSection) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Sets the CSRF section.
    #[must_use]
    pub fn csrf(mut self, csrf: CsrfSection) -> Self {
        self.config.csrf = csrf;
        self
    }

    /// Sets the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LoggingSection) -> Self {
        self.config.logging = logging;
        self
    }

    /// Returns the configuration without validating it.
    #[must_use]
    pub fn build(self) -> FlawlessConfig {
        self.config
    }

    /// Returns the configuration if it validates.
    pub fn build_validated(self) -> Result<FlawlessConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//! Layered configuration loader.
//!
//! Layers apply in order, later ones winning:
//! 1. defaults (or a preset)
//! 2. a TOML or JSON file
//! 3. environment variables named `PREFIX__SECTION__KEY`

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use flawless_telemetry::LogFormat;

use crate::{ConfigError, FlawlessConfig, RateLimitAlgorithm};

/// Builds a [`FlawlessConfig`] from defaults, a file and the environment.
///
/// # Example
///
/// ```no_run
/// use flawless_config::ConfigLoader;
///
/// # fn main() -> Result<(), flawless_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("dispatch.toml")?
///     .with_env_prefix("FLAWLESS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: FlawlessConfig,
    env_prefix: Option<String>,
    file_loaded: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: FlawlessConfig::default(),
            env_prefix: None,
            file_loaded: false,
        }
    }

    /// Resets to the default values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = FlawlessConfig::default();
        self
    }

    /// Starts from [`FlawlessConfig::development`].
    ///
    /// ```
    /// use flawless_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = FlawlessConfig::development();
        self
    }

    /// Starts from [`FlawlessConfig::production`].
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = FlawlessConfig::production();
        self
    }

    /// Loads a `.toml` or `.json` file, chosen by extension.
    ///
    /// Sections and keys the file leaves out take their default values, so
    /// a file replaces any preset selected before it.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        self.file_loaded = true;

        Ok(self)
    }

    /// Loads the file if it exists; otherwise leaves the configuration as is.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Parses configuration text in the named format (`toml` or `json`).
    ///
    /// ```
    /// use flawless_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[dispatcher]\ncache_capacity = 64\n", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.dispatcher.cache_capacity, 64);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        Ok(self)
    }

    /// Enables environment overrides for variables starting with `prefix`.
    ///
    /// `FLAWLESS__RATE_LIMIT__CAPACITY=50` sets `rate_limit.capacity`.
    /// Lists are comma-separated.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Returns true if a file layer was applied.
    #[must_use]
    pub fn file_loaded(&self) -> bool {
        self.file_loaded
    }

    /// Applies environment overrides and validates.
    pub fn load(mut self) -> Result<FlawlessConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> FlawlessConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<FlawlessConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let mut vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();
        vars.sort();

        for (key, value) in vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Shares the prefix but not the separator, e.g. FLAWLESSLY_DEBUG.
            return Ok(());
        };

        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["DISPATCHER", "CACHE_CAPACITY"] => {
                config.dispatcher.cache_capacity = parse_number(key, value)?;
            }
            ["DISPATCHER", "CACHE_TTL_SECS"] => {
                config.dispatcher.cache_ttl_secs = parse_optional_number(key, value)?;
            }
            ["DISPATCHER", "REQUEST_TIMEOUT_MS"] => {
                config.dispatcher.request_timeout_ms = parse_optional_number(key, value)?;
            }
            ["DISPATCHER", "HANDLE_OPTIONS"] => {
                config.dispatcher.handle_options = parse_bool_var(key, value)?;
            }

            ["CORS", "ENABLED"] => config.cors.enabled = parse_bool_var(key, value)?,
            ["CORS", "ALLOW_ORIGINS"] => config.cors.allow_origins = parse_list(value),
            ["CORS", "ALLOW_METHODS"] => config.cors.allow_methods = parse_list(value),
            ["CORS", "ALLOW_HEADERS"] => config.cors.allow_headers = parse_list(value),
            ["CORS", "EXPOSE_HEADERS"] => config.cors.expose_headers = parse_list(value),
            ["CORS", "ALLOW_CREDENTIALS"] => {
                config.cors.allow_credentials = parse_bool_var(key, value)?;
            }
            ["CORS", "MAX_AGE_SECS"] => {
                config.cors.max_age_secs = parse_optional_number(key, value)?;
            }

            ["RATE_LIMIT", "ENABLED"] => config.rate_limit.enabled = parse_bool_var(key, value)?,
            ["RATE_LIMIT", "CAPACITY"] => config.rate_limit.capacity = parse_number(key, value)?,
            ["RATE_LIMIT", "WINDOW_SECS"] => {
                config.rate_limit.window_secs = parse_number(key, value)?;
            }
            ["RATE_LIMIT", "ALGORITHM"] => {
                config.rate_limit.algorithm = match value.to_lowercase().as_str() {
                    "token_bucket" => RateLimitAlgorithm::TokenBucket,
                    "sliding_window" => RateLimitAlgorithm::SlidingWindow,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'token_bucket' or 'sliding_window'",
                        ))
                    }
                };
            }
            ["RATE_LIMIT", "KEY"] => config.rate_limit.key = value.trim().to_string(),

            ["CSRF", "ENABLED"] => config.csrf.enabled = parse_bool_var(key, value)?,
            ["CSRF", "HEADER_NAME"] => config.csrf.header_name = value.trim().to_string(),
            ["CSRF", "SESSION_COOKIE"] => config.csrf.session_cookie = value.trim().to_string(),
            ["CSRF", "TOKEN_TTL_SECS"] => {
                config.csrf.token_ttl_secs = parse_number(key, value)?;
            }
            ["CSRF", "EXEMPT_PATHS"] => config.csrf.exempt_paths = parse_list(value),

            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = LogFormat::from_str(value)
                    .map_err(|_| ConfigError::env_parse_error(key, "expected 'json' or 'pretty'"))?;
            }

            _ => {}
        }

        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected non-negative integer"))
}

/// Empty or `none` clears the value.
fn parse_optional_number<T: FromStr>(key: &str, value: &str) -> Result<Option<T>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer or 'none'"))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

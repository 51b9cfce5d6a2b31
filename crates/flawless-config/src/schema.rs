//! Configuration schema types.
//!
//! One struct per section. Every field has a serde default, so a file only
//! needs to mention what it changes, and unknown keys are rejected.

use flawless_middleware::stages::RateLimitAlgorithm;
use flawless_telemetry::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};

/// Dispatcher section: route cache and per-request behaviour.
///
/// # Example
///
/// ```
/// use flawless_config::DispatcherConfig;
///
/// let config = DispatcherConfig::default();
/// assert_eq!(config.cache_capacity, 2000);
/// assert_eq!(config.request_timeout_ms, Some(30_000));
/// assert!(config.handle_options);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Maximum number of resolved routes kept in the LRU cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Time-to-live of a cache entry in seconds. None keeps entries until
    /// evicted or invalidated.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Per-dispatch deadline in milliseconds. None disables the deadline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: Option<u64>,

    /// Answer OPTIONS for known paths with 204 and an Allow header.
    #[serde(default = "default_true")]
    pub handle_options: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: None,
            request_timeout_ms: default_request_timeout(),
            handle_options: true,
        }
    }
}

fn default_cache_capacity() -> usize {
    2000
}

#[allow(clippy::unnecessary_wraps)]
fn default_request_timeout() -> Option<u64> {
    Some(30_000)
}

fn default_true() -> bool {
    true
}

/// CORS section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsSection {
    /// Install the CORS unit.
    #[serde(default)]
    pub enabled: bool,

    /// Allowed origins; `"*"` allows any origin.
    #[serde(default = "default_allow_origins")]
    pub allow_origins: Vec<String>,

    /// Methods announced in preflight responses.
    #[serde(default = "default_allow_methods")]
    pub allow_methods: Vec<String>,

    /// Request headers announced in preflight responses.
    #[serde(default = "default_allow_headers")]
    pub allow_headers: Vec<String>,

    /// Response headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,

    /// Send `Access-Control-Allow-Credentials: true`.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: default_allow_origins(),
            allow_methods: default_allow_methods(),
            allow_headers: default_allow_headers(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

impl CorsSection {
    /// Returns true if the origin list contains the `"*"` wildcard.
    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.allow_origins.iter().any(|origin| origin == "*")
    }
}

fn default_allow_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allow_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_allow_headers() -> Vec<String> {
    vec!["*".to_string()]
}

/// Rate limit section.
///
/// `key` is one of `ip`, `global`, `header:<name>` or `value:<key>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    /// Install the rate limit unit.
    #[serde(default)]
    pub enabled: bool,

    /// Requests admitted per window.
    #[serde(default = "default_rate_capacity")]
    pub capacity: u64,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Counting algorithm.
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,

    /// Which requests share a budget.
    #[serde(default = "default_rate_key")]
    pub key: String,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_rate_capacity(),
            window_secs: default_window_secs(),
            algorithm: RateLimitAlgorithm::default(),
            key: default_rate_key(),
        }
    }
}

fn default_rate_capacity() -> u64 {
    1000
}

fn default_window_secs() -> u64 {
    1
}

fn default_rate_key() -> String {
    "ip".to_string()
}

/// CSRF section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CsrfSection {
    /// Install the CSRF unit.
    #[serde(default)]
    pub enabled: bool,

    /// Request header carrying the token.
    #[serde(default = "default_csrf_header")]
    pub header_name: String,

    /// Cookie carrying the session identifier.
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Issued token lifetime in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Paths (and their subtrees) that skip the check.
    #[serde(default)]
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfSection {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: default_csrf_header(),
            session_cookie: default_session_cookie(),
            token_ttl_secs: default_token_ttl(),
            exempt_paths: Vec::new(),
        }
    }
}

fn default_csrf_header() -> String {
    "x-csrf-token".to_string()
}

fn default_session_cookie() -> String {
    "session_id".to_string()
}

fn default_token_ttl() -> u64 {
    3600
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Filter directive, e.g. `"info"` or `"flawless=debug,hyper=warn"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingSection {
    /// Converts the section into a telemetry [`LogConfig`].
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        base.with_level(self.level.clone()).with_format(self.format)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

//! Typed configuration for Flawless dispatchers.
//!
//! - TOML and JSON files
//! - environment overrides (`FLAWLESS__SECTION__KEY`)
//! - strict parsing: unknown keys are errors
//! - layering: defaults → file → environment, then [`FlawlessConfig::validate`]
//!
//! # File format
//!
//! ```toml
//! [dispatcher]
//! cache_capacity = 2000
//! request_timeout_ms = 30000
//! handle_options = true
//!
//! [cors]
//! enabled = true
//! allow_origins = ["https://app.example.com"]
//! allow_credentials = true
//!
//! [rate_limit]
//! enabled = true
//! capacity = 1000
//! window_secs = 1
//! algorithm = "token_bucket"
//! key = "ip"
//!
//! [csrf]
//! enabled = true
//! exempt_paths = ["/webhooks"]
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{FlawlessConfig, FlawlessConfigBuilder};
pub use error::ConfigError;
pub use flawless_telemetry::LogFormat;
pub use loader::ConfigLoader;
pub use flawless_middleware::stages::RateLimitAlgorithm;
pub use schema::{CorsSection, CsrfSection, DispatcherConfig, LoggingSection, RateLimitSection};

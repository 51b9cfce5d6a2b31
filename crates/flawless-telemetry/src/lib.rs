//! Logging setup for Flawless dispatchers.
//!
//! Every dispatch runs inside a `dispatch` span and emits events carrying the
//! field names in [`fields`], so JSON logs can be filtered by route, outcome
//! or rejecting policy without parsing messages.
//!
//! ```text
//! {"level":"INFO","fields":{"message":"request dispatched","outcome":"matched",
//!  "route":"/users/{id}","http.status_code":200,"duration_ms":0.4}, ...}
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use flawless_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development()).expect("logging already initialized");
//! tracing::info!(route = "/health", "ready");
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, fields, init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

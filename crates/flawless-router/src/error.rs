//! Routing errors.

use http::Method;
use thiserror::Error;

/// Registration-time failure.
///
/// Registration errors are returned to the caller of `register`, which decides
/// whether to abort startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The pattern collides with a route already in the table.
    #[error("route {method} {pattern} conflicts with existing route {method} {existing}")]
    Conflict {
        /// Method of the rejected registration.
        method: Method,
        /// Pattern of the rejected registration.
        pattern: String,
        /// Pattern of the route it collides with.
        existing: String,
    },

    /// The pattern is malformed.
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl RouteError {
    pub(crate) fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Per-request resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No route consumes the full path.
    #[error("no route matches the path")]
    NotFound,

    /// The path matches, but only under other methods.
    #[error("method not allowed; allowed: {allowed:?}")]
    MethodNotAllowed {
        /// Methods registered for the matched path, in registration order.
        allowed: Vec<Method>,
    },
}

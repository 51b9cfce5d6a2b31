//! Dispatch outcomes and per-request error types.
//!
//! Every response leaving the dispatcher carries an [`Outcome`]. Failures that
//! travel through the middleware chain are expressed as [`DispatchError`], and
//! every variant knows how to render itself as a JSON error envelope:
//!
//! ```json
//! {
//!   "error": { "code": "RATE_LIMITED", "message": "...", "details": { ... } },
//!   "request_id": "0190..."
//! }
//! ```

use crate::types::{json_response, Response, ResponseExt};
use http::header::{HeaderValue, ALLOW, RETRY_AFTER};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Status taxonomy surfaced for every dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A route matched and the chain produced a response.
    Matched,
    /// No route matches the request path.
    NotFound,
    /// The path matches, but not for the request method.
    MethodNotAllowed,
    /// A policy unit (CORS, CSRF, rate limit, custom) short-circuited.
    RejectedByPolicy,
    /// The handler failed, panicked or timed out.
    HandlerFailure,
}

impl Outcome {
    /// Returns a stable, lowercase name suitable for log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::RejectedByPolicy => "rejected_by_policy",
            Self::HandlerFailure => "handler_failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code carried by a [`PolicyRejection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// The request `Origin` is not in the CORS allow-list.
    OriginNotAllowed,
    /// A CORS preflight asked for a method or header that is not allowed.
    PreflightRejected,
    /// A state-mutating request carried no CSRF token.
    CsrfTokenMissing,
    /// The CSRF token did not match the session's expected value.
    CsrfTokenInvalid,
    /// The client exceeded its request rate.
    RateLimited,
    /// Rejected by a user-defined policy.
    PolicyRejected,
}

impl RejectReason {
    /// Returns the machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OriginNotAllowed => "ORIGIN_NOT_ALLOWED",
            Self::PreflightRejected => "PREFLIGHT_REJECTED",
            Self::CsrfTokenMissing => "CSRF_TOKEN_MISSING",
            Self::CsrfTokenInvalid => "CSRF_TOKEN_INVALID",
            Self::RateLimited => "RATE_LIMITED",
            Self::PolicyRejected => "POLICY_REJECTED",
        }
    }

    /// Returns the HTTP status used when this reason is rendered.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::FORBIDDEN,
        }
    }
}

/// A short-circuit produced by a policy unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{policy} rejected request ({}): {message}", reason.code())]
pub struct PolicyRejection {
    /// Name of the unit that rejected the request.
    pub policy: String,
    /// Reason code.
    pub reason: RejectReason,
    /// Human-readable message.
    pub message: String,
    /// Hint for when the client may retry.
    pub retry_after: Option<Duration>,
}

impl PolicyRejection {
    /// Creates a rejection with no retry hint.
    #[must_use]
    pub fn new(policy: impl Into<String>, reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            reason,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attaches a retry-after hint.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Renders the rejection as a tagged error response.
    ///
    /// A retry hint becomes a `Retry-After` header rounded up to whole seconds.
    #[must_use]
    pub fn into_response(self, request_id: Option<&str>) -> Response {
        let retry_secs = self.retry_after.map(retry_after_secs);
        let rejected_by = RejectedBy(self.policy.clone());
        let envelope = ErrorEnvelope {
            error: ErrorDetail {
                code: self.reason.code().to_string(),
                message: self.message,
                details: Some(serde_json::json!({
                    "policy": self.policy,
                    "retry_after_seconds": retry_secs,
                })),
            },
            request_id: request_id.map(ToString::to_string),
        };
        let mut response = envelope.into_response(self.reason.status_code());
        if let Some(secs) = retry_secs {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response.extensions_mut().insert(rejected_by);
        response.with_outcome(Outcome::RejectedByPolicy)
    }
}

/// Response extension naming the unit that produced a policy rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedBy(pub String);

fn retry_after_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

/// Failure raised by a terminal handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A plain failure message.
    #[error("{0}")]
    Message(String),

    /// Any other error, with its source chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// The handler panicked; the payload is captured when it is a string.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The handler did not finish within the dispatch deadline.
    #[error("handler timed out after {0:?}")]
    TimedOut(Duration),
}

impl HandlerError {
    /// Creates a message error.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Per-request failure carried through the continuation's error channel.
///
/// The dispatcher turns every variant into a response; none of them escape
/// to the caller of `handle`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No route matches the path.
    #[error("no route matches the request path")]
    NotFound,

    /// The path exists under other methods.
    #[error("method not allowed")]
    MethodNotAllowed {
        /// Methods registered for the path.
        allowed: Vec<Method>,
    },

    /// A policy unit aborted the chain.
    #[error(transparent)]
    Rejected(#[from] PolicyRejection),

    /// The terminal handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Returns the outcome this error is reported as.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match self {
            Self::NotFound => Outcome::NotFound,
            Self::MethodNotAllowed { .. } => Outcome::MethodNotAllowed,
            Self::Rejected(_) => Outcome::RejectedByPolicy,
            Self::Handler(_) => Outcome::HandlerFailure,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Rejected(rejection) => rejection.reason.status_code(),
            Self::Handler(HandlerError::TimedOut(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::Rejected(rejection) => rejection.reason.code(),
            Self::Handler(HandlerError::TimedOut(_)) => "HANDLER_TIMEOUT",
            Self::Handler(_) => "INTERNAL_ERROR",
        }
    }

    /// Builds the JSON error envelope.
    ///
    /// Handler failures are reported generically; their detail is only logged.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        let (message, details) = match self {
            Self::NotFound => ("Not Found".to_string(), None),
            Self::MethodNotAllowed { allowed } => (
                "Method Not Allowed".to_string(),
                Some(serde_json::json!({
                    "allowed": allowed.iter().map(Method::as_str).collect::<Vec<_>>(),
                })),
            ),
            Self::Rejected(rejection) => (rejection.message.clone(), None),
            Self::Handler(HandlerError::TimedOut(_)) => ("Handler Timed Out".to_string(), None),
            Self::Handler(_) => ("Internal Server Error".to_string(), None),
        };
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
                details,
            },
            request_id: request_id.map(ToString::to_string),
        }
    }

    /// Renders the error as a response tagged with its [`Outcome`].
    #[must_use]
    pub fn into_response(self, request_id: Option<&str>) -> Response {
        match self {
            Self::Rejected(rejection) => rejection.into_response(request_id),
            other => {
                let mut response = other.to_envelope(request_id).into_response(other.status_code());
                if let Self::MethodNotAllowed { allowed } = &other {
                    if let Some(value) = allow_header(allowed) {
                        response.headers_mut().insert(ALLOW, value);
                    }
                }
                response.with_outcome(other.outcome())
            }
        }
    }
}

/// Turns a chain result into the response sent to the client.
///
/// A successful response nobody tagged is reported as [`Outcome::Matched`];
/// errors become tagged error envelopes carrying `request_id`.
#[must_use]
pub fn render_result(result: Result<Response, DispatchError>, request_id: &str) -> Response {
    match result {
        Ok(mut response) => {
            if response.outcome().is_none() {
                response.set_outcome(Outcome::Matched);
            }
            response
        }
        Err(err) => err.into_response(Some(request_id)),
    }
}

/// Formats a list of methods as an `Allow` header value.
#[must_use]
pub fn allow_header(methods: &[Method]) -> Option<HeaderValue> {
    let joined = methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    HeaderValue::from_str(&joined).ok()
}

/// JSON error envelope returned in error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error detail.
    pub error: ErrorDetail,
    /// Request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Body of an [`ErrorEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    /// Serializes the envelope into a JSON response with the given status.
    #[must_use]
    pub fn into_response(self, status: StatusCode) -> Response {
        let body = serde_json::to_value(&self).unwrap_or_else(|_| {
            serde_json::json!({"error": {"code": self.error.code, "message": self.error.message}})
        });
        json_response(status, &body)
    }
}

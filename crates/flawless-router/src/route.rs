//! Registered routes and pattern parsing.

use crate::error::RouteError;
use crate::normalize::{decode_segment, escape_segment};
use crate::params::Params;
use http::Method;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Capture name used by an anonymous trailing `*`.
pub const ANONYMOUS_WILDCARD: &str = "*";

/// One `/`-delimited component of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Literal text, e.g. `users`.
    Static(String),
    /// Named parameter, e.g. `{id}`. Captures exactly one segment.
    Param(String),
    /// Trailing catch-all, e.g. `*path` or `*`. Captures one or more segments.
    Wildcard(String),
}

impl Segment {
    /// Returns the capture name for param and wildcard segments.
    #[must_use]
    pub fn capture_name(&self) -> Option<&str> {
        match self {
            Self::Static(_) => None,
            Self::Param(name) | Self::Wildcard(name) => Some(name),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.write_str(&escape_segment(text)),
            Self::Param(name) => write!(f, "{{{name}}}"),
            Self::Wildcard(name) if name == ANONYMOUS_WILDCARD => f.write_str("*"),
            Self::Wildcard(name) => write!(f, "*{name}"),
        }
    }
}

/// Parses a route pattern into segments.
///
/// Empty segments are skipped the same way request paths are normalized, so
/// `/users/` registers the same shape as `/users`. Static segments are
/// percent-decoded like request segments. A wildcard must be the final
/// segment and capture names must be unique.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    if !pattern.starts_with('/') {
        return Err(RouteError::invalid(pattern, "pattern must start with '/'"));
    }

    let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut names = HashSet::new();

    for (index, part) in raw.iter().enumerate() {
        let segment = if let Some(inner) = part.strip_prefix('{') {
            let name = inner
                .strip_suffix('}')
                .ok_or_else(|| RouteError::invalid(pattern, format!("unclosed parameter {part:?}")))?;
            if name.is_empty() || name.contains(['{', '}', '*']) {
                return Err(RouteError::invalid(
                    pattern,
                    format!("invalid parameter name in {part:?}"),
                ));
            }
            Segment::Param(name.to_string())
        } else if let Some(name) = part.strip_prefix('*') {
            if index + 1 != raw.len() {
                return Err(RouteError::invalid(
                    pattern,
                    "wildcard must be the last segment",
                ));
            }
            if name.contains(['{', '}', '*']) {
                return Err(RouteError::invalid(
                    pattern,
                    format!("invalid wildcard name in {part:?}"),
                ));
            }
            let name = if name.is_empty() { ANONYMOUS_WILDCARD } else { name };
            Segment::Wildcard(name.to_string())
        } else if part.contains(['{', '}']) {
            return Err(RouteError::invalid(
                pattern,
                format!("braces must enclose a whole segment, found {part:?}"),
            ));
        } else {
            Segment::Static(decode_segment(part))
        };

        if let Some(name) = segment.capture_name() {
            if !names.insert(name.to_string()) {
                return Err(RouteError::invalid(
                    pattern,
                    format!("duplicate capture name {name:?}"),
                ));
            }
        }
        segments.push(segment);
    }

    Ok(segments)
}

/// Renders segments back into a canonical pattern string.
#[must_use]
pub fn format_pattern(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    segments.iter().fold(String::new(), |mut out, segment| {
        out.push('/');
        out.push_str(&segment.to_string());
        out
    })
}

/// A registered `(method, pattern) -> endpoint` binding.
///
/// `E` is whatever the owner of the table resolves to: a handler, a handler
/// plus its middleware overrides, or a plain identifier in tests.
pub struct Route<E> {
    method: Method,
    pattern: Arc<str>,
    segments: Vec<Segment>,
    endpoint: E,
}

impl<E> Route<E> {
    pub(crate) fn new(method: Method, segments: Vec<Segment>, endpoint: E) -> Self {
        Self {
            method,
            pattern: Arc::from(format_pattern(&segments)),
            segments,
            endpoint,
        }
    }

    /// The method this route answers.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The canonical pattern, e.g. `/users/{id}`.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The canonical pattern as a shared string.
    pub fn pattern_arc(&self) -> Arc<str> {
        Arc::clone(&self.pattern)
    }

    /// The parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The value this route resolves to.
    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }
}

impl<E> fmt::Debug for Route<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// A resolved route with the parameters captured from the request path.
pub struct RouteMatch<E> {
    /// The matched route, shared with the table that produced it.
    pub route: Arc<Route<E>>,
    /// Captured parameter values.
    pub params: Params,
}

impl<E> RouteMatch<E> {
    /// Returns true if both matches name the same route and captures.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.route, &other.route) && self.params == other.params
    }
}

impl<E> Clone for RouteMatch<E> {
    fn clone(&self) -> Self {
        Self {
            route: Arc::clone(&self.route),
            params: self.params.clone(),
        }
    }
}

impl<E> fmt::Debug for RouteMatch<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("route", &self.route)
            .field("params", &self.params)
            .finish()
    }
}

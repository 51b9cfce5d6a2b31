//! Request path normalization.
//!
//! Route resolution and the route cache both work on a [`NormalizedPath`].
//! The rule is:
//!
//! 1. Only the path is considered. A query string or fragment is dropped.
//! 2. The path is split on `/` and empty segments are discarded, so
//!    `/users/`, `/users` and `//users` are the same path.
//! 3. Each segment is percent-decoded on its own. A segment that does not
//!    decode to valid UTF-8 is kept as received.
//! 4. Matching is case-sensitive and `.`/`..` are ordinary segments.
//! 5. The canonical string is `/` followed by the segments joined with `/`,
//!    with `%` and `/` inside a decoded segment written back as `%25`/`%2F`.
//!    Two paths share a canonical string exactly when they have the same
//!    segments.

use std::borrow::Cow;
use std::fmt;

/// A request path reduced to its decoded segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath {
    canonical: String,
    segments: Vec<String>,
}

impl NormalizedPath {
    /// Normalizes a raw request path.
    ///
    /// ```rust
    /// use flawless_router::NormalizedPath;
    ///
    /// let path = NormalizedPath::new("/files//caf%C3%A9/?download=1");
    /// assert_eq!(path.as_str(), "/files/café");
    /// assert_eq!(path.segments(), ["files", "café"]);
    /// ```
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let path = raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(decode_segment)
            .collect();

        let mut canonical = String::with_capacity(path.len().max(1));
        for segment in &segments {
            canonical.push('/');
            canonical.push_str(&escape_segment(segment));
        }
        if canonical.is_empty() {
            canonical.push('/');
        }

        Self {
            canonical,
            segments,
        }
    }

    /// Normalizes the path component of a URI.
    #[must_use]
    pub fn from_uri(uri: &http::Uri) -> Self {
        Self::new(uri.path())
    }

    /// Returns the canonical string, used as the cache key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Returns the decoded segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true for `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl From<&str> for NormalizedPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

pub(crate) fn decode_segment(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

pub(crate) fn escape_segment(segment: &str) -> Cow<'_, str> {
    if segment.contains(['%', '/']) {
        Cow::Owned(segment.replace('%', "%25").replace('/', "%2F"))
    } else {
        Cow::Borrowed(segment)
    }
}

//! Common types used throughout the dispatch path.
//!
//! Requests reach the dispatcher with their body already collected, so the
//! request body is plain [`Bytes`]. Responses use a `Full<Bytes>` body which
//! hyper can serve directly.

use crate::error::Outcome;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;

/// The HTTP request type seen by the dispatcher.
pub type Request = http::Request<Bytes>;

/// The HTTP response type produced by handlers and middleware.
pub type Response = http::Response<Full<Bytes>>;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Builds a response with the given status and an empty body.
pub fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Builds a JSON response from an already-serialized value.
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Extension trait for reading and tagging the dispatch [`Outcome`].
pub trait ResponseExt {
    /// Returns the outcome recorded on this response, if any.
    fn outcome(&self) -> Option<Outcome>;

    /// Records the outcome on this response, replacing any previous value.
    fn set_outcome(&mut self, outcome: Outcome);

    /// Builder-style variant of [`ResponseExt::set_outcome`].
    fn with_outcome(self, outcome: Outcome) -> Self;
}

impl ResponseExt for Response {
    fn outcome(&self) -> Option<Outcome> {
        self.extensions().get::<Outcome>().copied()
    }

    fn set_outcome(&mut self, outcome: Outcome) {
        self.extensions_mut().insert(outcome);
    }

    fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.set_outcome(outcome);
        self
    }
}

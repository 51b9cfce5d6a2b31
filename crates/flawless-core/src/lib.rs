//! # Flawless Core
//!
//! Core types and traits shared by every layer of the Flawless dispatch engine.
//!
//! - [`RequestContext`] - Per-request state handed to middleware and handlers
//! - [`RequestId`] - UUID v7 request identifier
//! - [`Handler`] - Terminal request handler trait
//! - [`Outcome`] - Dispatch status taxonomy attached to every response
//! - [`DispatchError`] - Per-request failures carried through the chain
//! - [`PolicyRejection`] - Short-circuit produced by a policy unit

#![doc(html_root_url = "https://docs.rs/flawless-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod handler;
mod types;

pub use context::{RequestContext, RequestId};
pub use error::{
    allow_header, render_result, DispatchError, ErrorDetail, ErrorEnvelope, HandlerError, Outcome,
    PolicyRejection, RejectReason, RejectedBy,
};
pub use flawless_router::Params;
pub use handler::{handler_fn, BoxedHandler, FnHandler, Handler, HandlerResult};
pub use types::{empty_response, json_response, BoxFuture, Request, Response, ResponseExt};

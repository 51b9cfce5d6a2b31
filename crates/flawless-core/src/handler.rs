//! Handler trait for terminal request processing.
//!
//! A [`Handler`] is the last step of a dispatch: it receives the
//! [`RequestContext`] after every middleware unit has run and produces a
//! response or a [`HandlerError`].

use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::types::{BoxFuture, Response};
use std::sync::Arc;

/// Result returned by handlers.
pub type HandlerResult = Result<Response, HandlerError>;

/// A shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// The terminal handler of a dispatch.
///
/// # Example
///
/// ```
/// use flawless_core::{json_response, BoxFuture, Handler, HandlerResult, RequestContext};
/// use http::StatusCode;
///
/// struct GetUser;
///
/// impl Handler for GetUser {
///     fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
///         Box::pin(async move {
///             let id = ctx.param("id").unwrap_or_default();
///             Ok(json_response(StatusCode::OK, &serde_json::json!({ "id": id })))
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles the request described by `ctx`.
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        (**self).call(ctx)
    }
}

/// A handler built from a closure.
///
/// The closure must return a boxed future borrowing the context, which is
/// what `|ctx| Box::pin(async move { ... })` produces.
pub struct FnHandler<F> {
    func: F,
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        (self.func)(ctx)
    }
}

/// Wraps a closure as a [`Handler`].
///
/// ```
/// use flawless_core::{empty_response, handler_fn};
/// use http::StatusCode;
///
/// let handler = handler_fn(|_ctx| Box::pin(async move {
///     Ok(empty_response(StatusCode::NO_CONTENT))
/// }));
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(func: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    FnHandler { func }
}

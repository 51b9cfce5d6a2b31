//! Core middleware trait and continuation type.
//!
//! A [`Middleware`] unit receives the request context and a [`Next`]
//! continuation standing for the rest of the chain. A unit may:
//!
//! - call `next.run(ctx)` and post-process the response it gets back,
//! - return a response without calling `next` (short-circuit),
//! - return `Err(DispatchError)` to abort the whole chain.
//!
//! # Example
//!
//! ```
//! use flawless_core::{BoxFuture, RequestContext};
//! use flawless_middleware::{ChainResult, Middleware, Next};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, ChainResult> {
//!         Box::pin(async move {
//!             let response = next.run(ctx).await?;
//!             tracing::debug!(elapsed = ?ctx.elapsed(), "request finished");
//!             Ok(response)
//!         })
//!     }
//! }
//! ```

use flawless_core::{BoxFuture, DispatchError, Handler, RequestContext, Response};
use std::sync::Arc;

/// Result produced by every unit and by the chain as a whole.
///
/// `Ok` carries any response, including short-circuit rejections that
/// outer units may still post-process. `Err` aborts the remaining units on
/// the way out and is rendered by the dispatcher.
pub type ChainResult = Result<Response, DispatchError>;

/// A shared, type-erased middleware unit.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// A unit of the middleware chain.
///
/// Units are shared by every concurrent dispatch, so any internal state
/// must be synchronized by the unit itself.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this unit, used in logs and rejection envelopes.
    fn name(&self) -> &'static str;

    /// Processes the request, usually by calling `next.run(ctx)`.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ChainResult>;
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ChainResult> {
        (**self).process(ctx, next)
    }
}

/// The rest of the chain, as seen by one unit.
///
/// `Next` is a cursor over two slices: the remaining global units, then the
/// remaining route-scoped units, and finally the terminal handler. Running
/// it advances the cursor by one position, so chain depth never grows a
/// nested structure of boxed continuations.
pub struct Next<'a> {
    units: &'a [BoxedMiddleware],
    overrides: &'a [BoxedMiddleware],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Creates a continuation positioned at the first unit.
    pub fn new(
        units: &'a [BoxedMiddleware],
        overrides: &'a [BoxedMiddleware],
        handler: &'a dyn Handler,
    ) -> Self {
        Self {
            units,
            overrides,
            handler,
        }
    }

    /// Returns the number of units left before the handler.
    pub fn remaining(&self) -> usize {
        self.units.len() + self.overrides.len()
    }

    /// Invokes the next unit, or the handler when no units remain.
    ///
    /// Consumes `self`, so a unit can continue the chain at most once.
    pub async fn run(self, ctx: &mut RequestContext) -> ChainResult {
        if let Some((unit, rest)) = self.units.split_first() {
            let next = Next::new(rest, self.overrides, self.handler);
            return unit.process(ctx, next).await;
        }
        if let Some((unit, rest)) = self.overrides.split_first() {
            let next = Next::new(&[], rest, self.handler);
            return unit.process(ctx, next).await;
        }
        self.handler.call(ctx).await.map_err(DispatchError::from)
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

/// A middleware unit built from a closure.
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, ChainResult>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ChainResult> {
        (self.func)(ctx, next)
    }
}

/// Wraps a closure as a [`Middleware`] unit.
///
/// ```
/// use flawless_middleware::middleware_fn;
///
/// let tag = middleware_fn("tag", |ctx, next| Box::pin(async move {
///     ctx.insert_value("tagged", serde_json::json!(true));
///     next.run(ctx).await
/// }));
/// # let _ = tag;
/// ```
pub fn middleware_fn<F>(name: &'static str, func: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next<'a>) -> BoxFuture<'a, ChainResult>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware { name, func }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flawless_core::{empty_response, handler_fn, HandlerError};
    use http::StatusCode;

    struct Visit {
        name: &'static str,
    }

    impl Middleware for Visit {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, ChainResult> {
            Box::pin(async move {
                let mut trail = ctx
                    .value("trail")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                trail.push_str(self.name);
                ctx.insert_value("trail", serde_json::json!(trail));
                next.run(ctx).await
            })
        }
    }

    fn make_ctx() -> RequestContext {
        let request = http::Request::builder()
            .uri("/test")
            .body(Bytes::new())
            .unwrap();
        RequestContext::new(request)
    }

    #[tokio::test]
    async fn test_middleware_name() {
        let mw = Visit { name: "test" };
        assert_eq!(mw.name(), "test");
    }

    #[tokio::test]
    async fn test_next_runs_handler_when_empty() {
        let handler = handler_fn(|_ctx| Box::pin(async move { Ok(empty_response(StatusCode::OK)) }));
        let mut ctx = make_ctx();

        let next = Next::new(&[], &[], &handler);
        assert_eq!(next.remaining(), 0);
        let response = next.run(&mut ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_units_then_overrides_then_handler() {
        let units: Vec<BoxedMiddleware> = vec![
            Arc::new(Visit { name: "a" }),
            Arc::new(Visit { name: "b" }),
        ];
        let overrides: Vec<BoxedMiddleware> = vec![Arc::new(Visit { name: "r" })];
        let handler = handler_fn(|ctx| {
            Box::pin(async move {
                let trail = ctx.value("trail").cloned();
                assert_eq!(trail, Some(serde_json::json!("abr")));
                Ok(empty_response(StatusCode::OK))
            })
        });

        let mut ctx = make_ctx();
        let response = Next::new(&units, &overrides, &handler)
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_handler_error_enters_error_channel() {
        let handler = handler_fn(|_ctx| Box::pin(async move { Err(HandlerError::message("db down")) }));
        let mut ctx = make_ctx();

        let err = Next::new(&[], &[], &handler).run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
    }

    #[tokio::test]
    async fn test_fn_middleware_post_processes() {
        let unit = middleware_fn("stamp", |ctx, next| {
            Box::pin(async move {
                let mut response = next.run(ctx).await?;
                response
                    .headers_mut()
                    .insert("x-stamp", http::HeaderValue::from_static("1"));
                Ok(response)
            })
        });
        assert_eq!(unit.name(), "stamp");

        let units: Vec<BoxedMiddleware> = vec![Arc::new(unit)];
        let handler = handler_fn(|_ctx| Box::pin(async move { Ok(empty_response(StatusCode::OK)) }));
        let mut ctx = make_ctx();

        let response = Next::new(&units, &[], &handler).run(&mut ctx).await.unwrap();
        assert_eq!(response.headers()["x-stamp"], "1");
    }
}

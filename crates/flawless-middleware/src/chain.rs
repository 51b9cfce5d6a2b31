//! Ordered middleware chain.
//!
//! A [`Chain`] is built once from an ordered list of units and shared by
//! every dispatch. The order is fixed at construction: the first unit is the
//! outermost, so it sees the request first and the response last.
//!
//! ```text
//! request ─▶ A ─▶ B ─▶ C ─▶ [route overrides] ─▶ handler
//! response ◀─ A ◀─ B ◀─ C ◀─────────────────────────┘
//! ```

use crate::middleware::{BoxedMiddleware, ChainResult, Middleware, Next};
use flawless_core::{render_result, Handler, RequestContext, Response};
use std::sync::Arc;

/// An immutable, ordered list of middleware units.
///
/// Cloning a chain is cheap; clones share the same units.
#[derive(Clone)]
pub struct Chain {
    units: Arc<[BoxedMiddleware]>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::build(Vec::new())
    }
}

impl Chain {
    /// Builds a chain from units in outermost-first order.
    pub fn build<I>(units: I) -> Self
    where
        I: IntoIterator<Item = BoxedMiddleware>,
    {
        Self {
            units: units.into_iter().collect(),
        }
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Runs the chain with route-scoped `overrides` innermost, just before
    /// `handler`, and returns the raw result.
    pub async fn run(
        &self,
        ctx: &mut RequestContext,
        overrides: &[BoxedMiddleware],
        handler: &dyn Handler,
    ) -> ChainResult {
        Next::new(&self.units, overrides, handler).run(ctx).await
    }

    /// Runs the chain and always produces a response.
    ///
    /// Errors from the error channel are rendered as error envelopes, and a
    /// response nobody tagged is reported as
    /// [`Outcome::Matched`](flawless_core::Outcome::Matched).
    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        overrides: &[BoxedMiddleware],
        handler: &dyn Handler,
    ) -> Response {
        let result = self.run(ctx, overrides, handler).await;
        if let Err(err) = &result {
            tracing::debug!(
                request_id = %ctx.request_id(),
                outcome = %err.outcome(),
                error = %err,
                "middleware chain aborted"
            );
        }
        render_result(result, &ctx.request_id().to_string())
    }

    /// Returns unit names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.units.iter().map(|unit| unit.name()).collect()
    }

    /// Returns the units in execution order.
    #[must_use]
    pub fn units(&self) -> &[BoxedMiddleware] {
        &self.units
    }

    /// Returns the number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if the chain has no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("units", &self.names()).finish()
    }
}

/// Builder for a [`Chain`].
#[derive(Default)]
pub struct ChainBuilder {
    units: Vec<BoxedMiddleware>,
}

impl ChainBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit; it runs inside every unit added before it.
    #[must_use]
    pub fn layer<M: Middleware>(mut self, unit: M) -> Self {
        self.units.push(Arc::new(unit));
        self
    }

    /// Appends an already shared unit.
    #[must_use]
    pub fn layer_arc(mut self, unit: BoxedMiddleware) -> Self {
        self.units.push(unit);
        self
    }

    /// Appends a unit in place.
    pub fn push(&mut self, unit: BoxedMiddleware) {
        self.units.push(unit);
    }

    /// Returns the number of units added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if no units have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Freezes the units into a [`Chain`].
    #[must_use]
    pub fn build(self) -> Chain {
        Chain::build(self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::middleware_fn;
    use bytes::Bytes;
    use flawless_core::{
        empty_response, handler_fn, BoxFuture, DispatchError, HandlerError, Outcome,
        PolicyRejection, RejectReason, ResponseExt,
    };
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_ctx() -> RequestContext {
        let request = http::Request::builder()
            .uri("/items")
            .body(Bytes::new())
            .unwrap();
        RequestContext::new(request)
    }

    fn ok_handler() -> impl Handler {
        handler_fn(|_ctx| Box::pin(async move { Ok(empty_response(StatusCode::OK)) }))
    }

    /// Records its name on the way in and the way out.
    struct Trace {
        name: &'static str,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl Middleware for Trace {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            next: Next<'a>,
        ) -> BoxFuture<'a, ChainResult> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:in", self.name));
                let result = next.run(ctx).await;
                self.log.lock().push(format!("{}:out", self.name));
                result
            })
        }
    }

    #[tokio::test]
    async fn test_execution_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let chain = Chain::builder()
            .layer(Trace { name: "a", log: Arc::clone(&log) })
            .layer(Trace { name: "b", log: Arc::clone(&log) })
            .build();
        let overrides: Vec<BoxedMiddleware> = vec![Arc::new(Trace {
            name: "route",
            log: Arc::clone(&log),
        })];

        let mut ctx = make_ctx();
        let response = chain.execute(&mut ctx, &overrides, &ok_handler()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.outcome(), Some(Outcome::Matched));
        assert_eq!(
            *log.lock(),
            vec!["a:in", "b:in", "route:in", "route:out", "b:out", "a:out"]
        );
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_units() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner_calls = Arc::clone(&calls);
        let handler_calls = Arc::new(AtomicUsize::new(0));
        let handler_counter = Arc::clone(&handler_calls);

        let chain = Chain::builder()
            .layer(middleware_fn("outer", |ctx, next| {
                Box::pin(async move {
                    let mut response = next.run(ctx).await?;
                    response
                        .headers_mut()
                        .insert("x-outer", http::HeaderValue::from_static("seen"));
                    Ok(response)
                })
            }))
            .layer(middleware_fn("deny", |ctx, _next| {
                Box::pin(async move {
                    let id = ctx.request_id().to_string();
                    let rejection =
                        PolicyRejection::new("deny", RejectReason::PolicyRejected, "denied");
                    Ok(rejection.into_response(Some(&id)))
                })
            }))
            .layer(middleware_fn("inner", move |ctx, next| {
                inner_calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(next.run(ctx))
            }))
            .build();

        let handler = handler_fn(move |_ctx| {
            handler_counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(empty_response(StatusCode::OK)) })
        });

        let mut ctx = make_ctx();
        let response = chain.execute(&mut ctx, &[], &handler).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.outcome(), Some(Outcome::RejectedByPolicy));
        assert_eq!(response.headers()["x-outer"], "seen");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_channel_bypasses_post_processing() {
        let chain = Chain::builder()
            .layer(middleware_fn("outer", |ctx, next| {
                Box::pin(async move {
                    let mut response = next.run(ctx).await?;
                    response
                        .headers_mut()
                        .insert("x-outer", http::HeaderValue::from_static("seen"));
                    Ok(response)
                })
            }))
            .build();
        let handler = handler_fn(|_ctx| Box::pin(async move { Err(HandlerError::message("boom")) }));

        let mut ctx = make_ctx();
        let response = chain.execute(&mut ctx, &[], &handler).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.outcome(), Some(Outcome::HandlerFailure));
        assert!(response.headers().get("x-outer").is_none());
    }

    #[tokio::test]
    async fn test_run_exposes_raw_error() {
        let chain = Chain::build(Vec::new());
        let handler = handler_fn(|_ctx| Box::pin(async move { Err(HandlerError::message("boom")) }));

        let mut ctx = make_ctx();
        let err = chain.run(&mut ctx, &[], &handler).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(HandlerError::Message(_))));
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_tagged_outcome_preserved() {
        let chain = Chain::default();
        let handler = handler_fn(|_ctx| {
            Box::pin(async move {
                Ok(empty_response(StatusCode::NOT_FOUND).with_outcome(Outcome::NotFound))
            })
        });

        let mut ctx = make_ctx();
        let response = chain.execute(&mut ctx, &[], &handler).await;
        assert_eq!(response.outcome(), Some(Outcome::NotFound));
    }
}

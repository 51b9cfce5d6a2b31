//! # Flawless
//!
//! Request routing and middleware dispatch engine.
//!
//! - **Route table** – static, `{param}` and `*wildcard` segments with
//!   registration-time conflict detection
//! - **Route cache** – bounded LRU of resolved routes, invalidated on every
//!   registration
//! - **Middleware chain** – continuation-based units that can post-process,
//!   answer early, or reject
//! - **Built-in policies** – CORS, rate limiting and CSRF, driven by
//!   configuration
//!
//! ## Quick Start
//!
//! ```
//! use flawless::prelude::*;
//! use http::{Method, StatusCode};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::builder()
//!     .route(
//!         Method::GET,
//!         "/users/{id}",
//!         handler_fn(|ctx| Box::pin(async move {
//!             let id = ctx.param("id").unwrap_or_default().to_string();
//!             Ok(json_response(StatusCode::OK, &serde_json::json!({ "id": id })))
//!         })),
//!     )?
//!     .build();
//!
//! let request = http::Request::get("/users/42").body(bytes::Bytes::new())?;
//! let response = dispatcher.handle(request).await;
//! assert_eq!(response.status(), StatusCode::OK);
//! assert_eq!(response.outcome(), Some(Outcome::Matched));
//! # Ok(())
//! # }
//! ```
//!
//! ## Dispatch
//!
//! ```text
//! Request → normalize → cache / table → CORS → Rate limit → CSRF → custom units → route overrides → Handler
//! ```
//!
//! Every response carries an [`Outcome`](flawless_core::Outcome):
//! `Matched`, `NotFound`, `MethodNotAllowed`, `RejectedByPolicy` or
//! `HandlerFailure`.

#![doc(html_root_url = "https://docs.rs/flawless/0.1.0")]
#![forbid(unsafe_code)]

mod builtins;
mod dispatcher;
pub mod server;

pub use dispatcher::{
    Dispatcher, DispatcherBuilder, Endpoint, RouteInfo, RouteOptions, DEFAULT_REQUEST_TIMEOUT,
};
pub use server::{serve, DRAIN_TIMEOUT};

/// Re-export of core types.
pub use flawless_core as core;

/// Re-export of the routing crate.
pub use flawless_router as router;

/// Re-export of the middleware crate.
pub use flawless_middleware as middleware;

/// Re-export of configuration.
pub use flawless_config as config;

/// Re-export of logging setup.
pub use flawless_telemetry as telemetry;

/// Commonly used types.
pub mod prelude {
    pub use crate::{serve, Dispatcher, DispatcherBuilder, RouteInfo, RouteOptions};

    pub use flawless_core::{
        empty_response, handler_fn, json_response, DispatchError, Handler, HandlerError,
        HandlerResult, Outcome, PolicyRejection, RejectReason, Request, RequestContext, Response,
        ResponseExt,
    };

    pub use flawless_middleware::stages::{
        CorsMiddleware, CsrfMiddleware, CsrfStore, KeyExtractor, RateLimitMiddleware,
    };
    pub use flawless_middleware::{middleware_fn, ChainResult, Middleware, Next};

    pub use flawless_config::{ConfigLoader, FlawlessConfig};
    pub use flawless_router::{CacheStats, RouteError};
    pub use flawless_telemetry::{init_logging, LogConfig};
}

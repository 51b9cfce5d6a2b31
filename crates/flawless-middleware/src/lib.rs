//! # Flawless Middleware
//!
//! Continuation-based middleware chain and the built-in policy units.
//!
//! A [`Chain`] is an ordered list of [`Middleware`] units built once at
//! startup. Each dispatch walks it with a [`Next`] cursor: a unit may call
//! the rest of the chain and post-process the response, answer directly
//! without calling it, or abort with a [`flawless_core::DispatchError`].
//!
//! ```text
//! Request → CORS → Rate limit → CSRF → custom units → route overrides → Handler
//!                                                                          ↓
//! Response ← CORS ← Rate limit ← CSRF ← custom units ← route overrides ←──┘
//! ```
//!
//! ## Example
//!
//! ```
//! use flawless_middleware::stages::{CorsMiddleware, CsrfMiddleware, RateLimitMiddleware};
//! use flawless_middleware::Chain;
//!
//! let chain = Chain::builder()
//!     .layer(CorsMiddleware::default())
//!     .layer(RateLimitMiddleware::builder().capacity(100).build())
//!     .layer(CsrfMiddleware::default())
//!     .build();
//!
//! assert_eq!(chain.names(), vec!["cors", "rate_limit", "csrf"]);
//! ```

#![doc(html_root_url = "https://docs.rs/flawless-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod middleware;
pub mod stages;

pub use chain::{Chain, ChainBuilder};
pub use middleware::{middleware_fn, BoxedMiddleware, ChainResult, FnMiddleware, Middleware, Next};

//! Segment trie router and route cache for Flawless.
//!
//! This crate resolves `(method, path)` pairs to registered routes:
//!
//! - **Route table**: a trie of path segments supporting static text,
//!   `{name}` parameters and trailing `*name` / `*` wildcards, keyed by method
//! - **Normalization**: one documented rule turning request paths into cache
//!   keys and trie segments (see [`NormalizedPath`])
//! - **Route cache**: a bounded, strict-LRU map in front of the table
//!
//! # Example
//!
//! ```rust
//! use flawless_router::{NormalizedPath, RouteCache, RouteTable};
//! use http::Method;
//!
//! let mut table = RouteTable::new();
//! table.register(Method::GET, "/users/{id}", "getUser").unwrap();
//!
//! let cache = RouteCache::with_capacity(128);
//! let path = NormalizedPath::new("/users/42/");
//!
//! let matched = match cache.lookup(&Method::GET, path.as_str()) {
//!     Some(entry) => entry.matched,
//!     None => {
//!         let matched = table.resolve(&Method::GET, &path).unwrap();
//!         cache.insert(Method::GET, path.as_str(), matched.clone());
//!         matched
//!     }
//! };
//! assert_eq!(matched.params.get("id"), Some("42"));
//! ```
//!
//! # Architecture
//!
//! ```text
//!                    (root)
//!                      │
//!              ┌───────┴───────┐
//!              │               │
//!            "users"        "files"
//!              │               │
//!        ┌─────┴─────┐       "*path"
//!        │           │      [GET]
//!      (leaf)     "{id}"
//!   [GET,POST]      │
//!                 (leaf)
//!              [GET,DELETE]
//! ```

mod cache;
mod error;
mod method_router;
mod node;
mod normalize;
mod params;
mod route;
mod table;

pub use cache::{CacheConfig, CacheEntry, CacheStats, RouteCache, DEFAULT_CACHE_CAPACITY};
pub use error::{ResolveError, RouteError};
pub use method_router::MethodRouter;
pub use normalize::NormalizedPath;
pub use params::Params;
pub use route::{format_pattern, parse_pattern, Route, RouteMatch, Segment, ANONYMOUS_WILDCARD};
pub use table::RouteTable;

//! End-to-end dispatch tests.
//!
//! Requests go through [`Dispatcher::handle`] exactly as the server would
//! send them: resolution, cache, global chain, route overrides, handler.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use flawless::prelude::*;
use flawless_config::{CorsSection, CsrfSection, DispatcherConfig, RateLimitSection};
use flawless_core::ErrorEnvelope;
use http::header::ALLOW;
use http::{Method, StatusCode};
use http_body_util::BodyExt;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn request(method: Method, path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = http::Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Bytes::new()).unwrap()
}

fn get(path: &str) -> Request {
    request(Method::GET, path, &[])
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn ok() -> impl Handler {
    handler_fn(|_ctx| Box::pin(async { Ok(empty_response(StatusCode::OK)) }))
}

fn echo_param(name: &'static str) -> impl Handler {
    handler_fn(move |ctx| {
        let value = ctx.param(name).map(str::to_string);
        Box::pin(async move {
            Ok(json_response(StatusCode::OK, &serde_json::json!({ name: value })))
        })
    })
}

fn recorder(name: &'static str, log: Log) -> impl Middleware {
    middleware_fn(name, move |ctx, next| {
        log.lock().unwrap().push(name);
        Box::pin(next.run(ctx))
    })
}

fn recording_handler(log: Log) -> impl Handler {
    handler_fn(move |_ctx| {
        log.lock().unwrap().push("handler");
        Box::pin(async { Ok(empty_response(StatusCode::OK)) })
    })
}

#[tokio::test]
async fn test_param_route_matches() {
    let dispatcher = Dispatcher::builder()
        .route(Method::GET, "/users/{id}", echo_param("id"))
        .unwrap()
        .build();

    let response = dispatcher.handle(get("/users/42")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.outcome(), Some(Outcome::Matched));
    assert_eq!(body_json(response).await, serde_json::json!({ "id": "42" }));
}

#[tokio::test]
async fn test_unknown_path_skips_chain() {
    let entered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&entered);
    let dispatcher = Dispatcher::builder()
        .middleware(middleware_fn("count", move |ctx, next| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(next.run(ctx))
        }))
        .route(Method::GET, "/users/{id}", ok())
        .unwrap()
        .build();

    let response = dispatcher.handle(get("/unknown")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.outcome(), Some(Outcome::NotFound));
    assert_eq!(entered.load(Ordering::SeqCst), 0);

    let envelope: ErrorEnvelope = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(envelope.error.code, "NOT_FOUND");
    assert!(envelope.request_id.is_some());
}

#[tokio::test]
async fn test_csrf_protects_form_post() {
    let config = FlawlessConfig::builder()
        .csrf(CsrfSection {
            enabled: true,
            ..CsrfSection::default()
        })
        .build();
    let dispatcher = DispatcherBuilder::from_config(&config)
        .unwrap()
        .route(Method::POST, "/form", ok())
        .unwrap()
        .build();

    let missing = dispatcher
        .handle(request(Method::POST, "/form", &[("cookie", "session_id=abc")]))
        .await;
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);
    assert_eq!(missing.outcome(), Some(Outcome::RejectedByPolicy));
    let envelope: ErrorEnvelope = serde_json::from_value(body_json(missing).await).unwrap();
    assert_eq!(envelope.error.code, "CSRF_TOKEN_MISSING");

    let token = dispatcher.csrf_store().unwrap().issue("abc");
    let accepted = dispatcher
        .handle(request(
            Method::POST,
            "/form",
            &[("cookie", "session_id=abc"), ("x-csrf-token", token.as_str())],
        ))
        .await;
    assert_eq!(accepted.status(), StatusCode::OK);
    assert_eq!(accepted.outcome(), Some(Outcome::Matched));
}

#[tokio::test]
async fn test_wildcard_captures_remainder() {
    let dispatcher = Dispatcher::builder()
        .route(Method::GET, "/static/*", echo_param("*"))
        .unwrap()
        .build();

    let response = dispatcher.handle(get("/static/a/b/c")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({ "*": "a/b/c" }));
}

#[tokio::test]
async fn test_wrong_method_lists_allowed() {
    let dispatcher = Dispatcher::builder()
        .route(Method::GET, "/items", ok())
        .unwrap()
        .route(Method::POST, "/items", ok())
        .unwrap()
        .build();

    let response = dispatcher.handle(request(Method::DELETE, "/items", &[])).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.outcome(), Some(Outcome::MethodNotAllowed));
    assert_eq!(response.headers()[ALLOW], "GET, POST");
}

#[tokio::test]
async fn test_allow_lists_every_route_matching_the_path() {
    let dispatcher = Dispatcher::builder()
        .route(Method::GET, "/items/new", ok())
        .unwrap()
        .route(Method::POST, "/items/{id}", ok())
        .unwrap()
        .build();

    let response = dispatcher.handle(request(Method::DELETE, "/items/new", &[])).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[ALLOW], "GET, POST");

    let response = dispatcher.handle(request(Method::OPTIONS, "/items/new", &[])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[ALLOW], "GET, POST, OPTIONS");

    let response = dispatcher.handle(request(Method::DELETE, "/items/7", &[])).await;
    assert_eq!(response.headers()[ALLOW], "POST");
}

#[tokio::test]
async fn test_automatic_options() {
    let dispatcher = Dispatcher::builder()
        .route(Method::GET, "/items", ok())
        .unwrap()
        .route(Method::POST, "/items", ok())
        .unwrap()
        .build();

    let response = dispatcher.handle(request(Method::OPTIONS, "/items", &[])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.outcome(), Some(Outcome::Matched));
    assert_eq!(response.headers()[ALLOW], "GET, POST, OPTIONS");

    let disabled = Dispatcher::builder()
        .handle_options(false)
        .route(Method::GET, "/items", ok())
        .unwrap()
        .build();
    let response = disabled.handle(request(Method::OPTIONS, "/items", &[])).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_cors_preflight_on_known_path() {
    let config = FlawlessConfig::builder()
        .cors(CorsSection {
            enabled: true,
            ..CorsSection::default()
        })
        .build();
    let dispatcher = DispatcherBuilder::from_config(&config)
        .unwrap()
        .route(Method::POST, "/form", ok())
        .unwrap()
        .build();

    let response = dispatcher
        .handle(request(
            Method::OPTIONS,
            "/form",
            &[
                ("origin", "https://app.example.com"),
                ("access-control-request-method", "POST"),
            ],
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_units_run_in_order_with_overrides_innermost() {
    let log: Log = Arc::default();
    let dispatcher = Dispatcher::builder()
        .middleware(recorder("first", Arc::clone(&log)))
        .middleware(recorder("second", Arc::clone(&log)))
        .route_with(
            Method::GET,
            "/audited",
            recording_handler(Arc::clone(&log)),
            RouteOptions::new().middleware(recorder("route", Arc::clone(&log))),
        )
        .unwrap()
        .route(Method::GET, "/plain", recording_handler(Arc::clone(&log)))
        .unwrap()
        .build();

    dispatcher.handle(get("/audited")).await;
    assert_eq!(*log.lock().unwrap(), ["first", "second", "route", "handler"]);

    log.lock().unwrap().clear();
    dispatcher.handle(get("/plain")).await;
    assert_eq!(*log.lock().unwrap(), ["first", "second", "handler"]);
}

#[tokio::test]
async fn test_short_circuit_skips_rest_of_chain() {
    let log: Log = Arc::default();
    let dispatcher = Dispatcher::builder()
        .middleware(recorder("outer", Arc::clone(&log)))
        .middleware(middleware_fn("gate", |ctx, next| {
            let blocked = ctx.header("x-tenant").is_none();
            Box::pin(async move {
                if blocked {
                    return Err(DispatchError::from(PolicyRejection::new(
                        "tenant",
                        RejectReason::PolicyRejected,
                        "tenant required",
                    )));
                }
                next.run(ctx).await
            })
        }))
        .middleware(recorder("inner", Arc::clone(&log)))
        .route(Method::GET, "/data", recording_handler(Arc::clone(&log)))
        .unwrap()
        .build();

    let rejected = dispatcher.handle(get("/data")).await;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert_eq!(rejected.outcome(), Some(Outcome::RejectedByPolicy));
    assert_eq!(*log.lock().unwrap(), ["outer"]);

    log.lock().unwrap().clear();
    let passed = dispatcher
        .handle(request(Method::GET, "/data", &[("x-tenant", "acme")]))
        .await;
    assert_eq!(passed.status(), StatusCode::OK);
    assert_eq!(*log.lock().unwrap(), ["outer", "inner", "handler"]);
}

#[tokio::test]
async fn test_post_processing_sees_handler_response() {
    let dispatcher = Dispatcher::builder()
        .middleware(middleware_fn("stamp", |ctx, next| {
            Box::pin(async move {
                next.run(ctx).await.map(|mut response| {
                    response
                        .headers_mut()
                        .insert("x-stamped", http::HeaderValue::from_static("yes"));
                    response
                })
            })
        }))
        .route(Method::GET, "/", ok())
        .unwrap()
        .build();

    let response = dispatcher.handle(get("/")).await;
    assert_eq!(response.headers()["x-stamped"], "yes");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rate_limit_admits_exact_budget() {
    let config = FlawlessConfig::builder()
        .rate_limit(RateLimitSection {
            enabled: true,
            capacity: 20,
            window_secs: 3600,
            key: "global".to_string(),
            ..RateLimitSection::default()
        })
        .build();
    let dispatcher = Arc::new(
        DispatcherBuilder::from_config(&config)
            .unwrap()
            .route(Method::GET, "/limited", ok())
            .unwrap()
            .build(),
    );

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.handle(get("/limited")).await.status() })
        })
        .collect();

    let mut admitted = 0;
    let mut limited = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(admitted, 20);
    assert_eq!(limited, 80);
}

#[tokio::test]
async fn test_rate_limit_rejection_has_retry_after() {
    let config = FlawlessConfig::builder()
        .rate_limit(RateLimitSection {
            enabled: true,
            capacity: 1,
            window_secs: 60,
            key: "global".to_string(),
            ..RateLimitSection::default()
        })
        .build();
    let dispatcher = DispatcherBuilder::from_config(&config)
        .unwrap()
        .route(Method::GET, "/", ok())
        .unwrap()
        .build();

    assert_eq!(dispatcher.handle(get("/")).await.status(), StatusCode::OK);
    let limited = dispatcher.handle(get("/")).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.outcome(), Some(Outcome::RejectedByPolicy));
    assert!(limited.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_cache_evicts_least_recently_used() {
    let dispatcher = Dispatcher::builder()
        .cache_capacity(2)
        .route(Method::GET, "/users/{id}", ok())
        .unwrap()
        .build();

    dispatcher.handle(get("/users/1")).await;
    dispatcher.handle(get("/users/2")).await;
    dispatcher.handle(get("/users/1")).await;
    dispatcher.handle(get("/users/3")).await;

    let stats = dispatcher.cache_stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.hits, 1);

    // "/users/2" was the least recently used entry.
    dispatcher.handle(get("/users/1")).await;
    dispatcher.handle(get("/users/2")).await;
    let stats = dispatcher.cache_stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 4);
}

#[tokio::test]
async fn test_runtime_registration_invalidates_cache() {
    let dispatcher = Dispatcher::builder()
        .route(Method::GET, "/files/{name}", echo_param("name"))
        .unwrap()
        .build();

    let before = dispatcher.handle(get("/files/readme")).await;
    assert_eq!(body_json(before).await, serde_json::json!({ "name": "readme" }));
    assert_eq!(dispatcher.cache_stats().size, 1);

    let info = dispatcher
        .register(
            Method::GET,
            "/files/readme",
            handler_fn(|_ctx| {
                Box::pin(async {
                    Ok(json_response(StatusCode::OK, &serde_json::json!({ "static": true })))
                })
            }),
            RouteOptions::new(),
        )
        .unwrap();
    assert_eq!(info.pattern, "/files/readme");
    assert_eq!(dispatcher.cache_stats().size, 0);
    assert_eq!(dispatcher.cache_stats().invalidations, 1);

    let after = dispatcher.handle(get("/files/readme")).await;
    assert_eq!(body_json(after).await, serde_json::json!({ "static": true }));
}

#[tokio::test]
async fn test_handler_error_is_handler_failure() {
    let dispatcher = Dispatcher::builder()
        .route(
            Method::GET,
            "/broken",
            handler_fn(|_ctx| {
                Box::pin(async { Err(HandlerError::Message("database unavailable".into())) })
            }),
        )
        .unwrap()
        .build();

    let response = dispatcher.handle(get("/broken")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.outcome(), Some(Outcome::HandlerFailure));
    let body = body_json(response).await;
    assert!(!body.to_string().contains("database"));
}

fn explode() -> HandlerResult {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let dispatcher = Dispatcher::builder()
        .route(
            Method::GET,
            "/panic",
            handler_fn(|_ctx| Box::pin(async { explode() })),
        )
        .unwrap()
        .route(Method::GET, "/fine", ok())
        .unwrap()
        .build();

    let response = dispatcher.handle(get("/panic")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.outcome(), Some(Outcome::HandlerFailure));

    assert_eq!(dispatcher.handle(get("/fine")).await.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out() {
    let dispatcher = Dispatcher::builder()
        .request_timeout(Duration::from_secs(1))
        .route(
            Method::GET,
            "/slow",
            handler_fn(|_ctx| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(empty_response(StatusCode::OK))
                })
            }),
        )
        .unwrap()
        .build();

    let response = dispatcher.handle(get("/slow")).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.outcome(), Some(Outcome::HandlerFailure));
}

struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_dispatch_releases_context() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let dispatcher = Dispatcher::builder()
        .no_request_timeout()
        .middleware(middleware_fn("attach", move |ctx, next| {
            ctx.set_extension(ReleaseFlag(Arc::clone(&flag)));
            Box::pin(next.run(ctx))
        }))
        .route(
            Method::GET,
            "/hang",
            handler_fn(|_ctx| Box::pin(std::future::pending::<HandlerResult>())),
        )
        .unwrap()
        .build();

    let result = tokio::time::timeout(Duration::from_millis(10), dispatcher.handle(get("/hang"))).await;
    assert!(result.is_err());
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_from_config_installs_builtins_in_order() {
    let config = FlawlessConfig::builder()
        .dispatcher(DispatcherConfig {
            cache_capacity: 16,
            ..DispatcherConfig::default()
        })
        .cors(CorsSection {
            enabled: true,
            ..CorsSection::default()
        })
        .rate_limit(RateLimitSection {
            enabled: true,
            ..RateLimitSection::default()
        })
        .csrf(CsrfSection {
            enabled: true,
            ..CsrfSection::default()
        })
        .build();

    let dispatcher = DispatcherBuilder::from_config(&config)
        .unwrap()
        .middleware(middleware_fn("custom", |ctx, next| Box::pin(next.run(ctx))))
        .build();

    assert_eq!(dispatcher.chain().names(), ["cors", "rate_limit", "csrf", "custom"]);
    assert_eq!(dispatcher.cache_stats().capacity, 16);
    assert!(dispatcher.csrf_store().is_some());
}

#[test]
fn test_from_config_rejects_invalid() {
    let config = FlawlessConfig::builder()
        .dispatcher(DispatcherConfig {
            cache_capacity: 0,
            ..DispatcherConfig::default()
        })
        .build();
    assert!(DispatcherBuilder::from_config(&config).is_err());
}

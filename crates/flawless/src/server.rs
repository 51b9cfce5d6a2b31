//! Minimal HTTP/1.1 front end for a [`Dispatcher`].
//!
//! Bodies are buffered before dispatch and the peer address is attached to
//! the request as a [`SocketAddr`] extension, which the per-IP rate limiter
//! falls back to.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use flawless_core::{empty_response, Response};

use crate::Dispatcher;

/// How long open connections get to finish after shutdown is requested.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts connections until `shutdown` resolves, then drains them.
///
/// Connections still open after [`DRAIN_TIMEOUT`] are aborted.
///
/// ```no_run
/// use std::sync::Arc;
/// use flawless::{serve, Dispatcher};
///
/// # async fn run() -> std::io::Result<()> {
/// let dispatcher = Arc::new(Dispatcher::builder().build());
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
/// serve(listener, dispatcher, async {
///     let _ = tokio::signal::ctrl_c().await;
/// })
/// .await
/// # }
/// ```
pub async fn serve<F>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        Arc::clone(&dispatcher),
                        stop_rx.clone(),
                    ));
                }
                Err(e) => tracing::error!(error = %e, "failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            () = &mut shutdown => {
                tracing::info!("shutdown requested, draining connections");
                break;
            }
        }
    }

    let _ = stop_tx.send(true);
    let open = connections.len();
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    match drained {
        Ok(()) => tracing::info!(connections = open, "server stopped"),
        Err(_) => {
            tracing::warn!(remaining = connections.len(), "drain timeout reached, aborting connections");
            connections.shutdown().await;
        }
    }
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    mut stop: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |request: http::Request<Incoming>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { Ok::<_, Infallible>(handle_request(&dispatcher, request, peer).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
            return;
        }
        _ = stop.changed() => conn.as_mut().graceful_shutdown(),
    }

    if let Err(e) = conn.await {
        tracing::debug!(%peer, error = %e, "connection closed with error during shutdown");
    }
}

async fn handle_request(
    dispatcher: &Dispatcher,
    request: http::Request<Incoming>,
    peer: SocketAddr,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(%peer, error = %e, "failed to read request body");
            return empty_response(StatusCode::BAD_REQUEST);
        }
    };

    parts.extensions.insert(peer);
    dispatcher.handle(http::Request::from_parts(parts, body)).await
}

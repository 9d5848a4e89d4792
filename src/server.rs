//! HTTP transport and graceful shutdown.
//!
//! The server owns everything that is about HTTP on the wire rather than about
//! comments: percent-decoding the path, collecting the body, the peer address,
//! the static asset layer, `HEAD` bodies and the access log. Everything else is
//! the [`Dispatcher`]'s.
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::static_files::StaticFiles;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    assets: Option<StaticFiles>,
}

struct Shared {
    dispatcher: Dispatcher,
    assets: Option<StaticFiles>,
}

impl Server {
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr, assets: None }
    }

    /// Serves `dir` under `/static/`.
    #[must_use]
    pub fn static_files(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets = Some(StaticFiles::new(dir));
        self
    }

    /// Accepts connections until a shutdown signal, then drains them.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let shared = Arc::new(Shared { dispatcher, assets: self.assets });

        info!(addr = %self.addr, "glosa listening");

        let mut tasks = tokio::task::JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let shared = Arc::clone(&shared);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let shared = Arc::clone(&shared);
                            async move { Ok::<_, Infallible>(handle(&shared, req, remote_addr).await) }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connections.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("glosa stopped");
        Ok(())
    }
}

// ── Request handling ──────────────────────────────────────────────────────────

async fn handle(
    shared: &Shared,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> http::Response<Full<Bytes>> {
    let started = Instant::now();
    let method = req.method().clone();
    let raw_path = req.uri().path().to_owned();
    let head_only = method == http::Method::HEAD;

    let response = match into_request(req, remote_addr).await {
        Ok(req) => match &shared.assets {
            Some(assets) if StaticFiles::handles(req.path()) => assets.serve(&req).await,
            _ => shared.dispatcher.handle(req).await,
        },
        Err(res) => res,
    };

    info!(
        %method,
        path = %raw_path,
        status = response.status_code().as_u16(),
        latency_ms = started.elapsed().as_secs_f64() * 1000.0,
        peer = %remote_addr,
        "request"
    );
    response.into_http(head_only)
}

/// Decodes the path and collects the body. Failures are the client's.
async fn into_request<B>(req: hyper::Request<B>, remote_addr: SocketAddr) -> Result<Request, Response>
where
    B: Body,
    B::Error: fmt::Display,
{
    let (parts, body) = req.into_parts();

    let path = percent_decode_str(parts.uri.path())
        .decode_utf8()
        .map_err(|_| bad_request("path is not valid UTF-8"))?
        .into_owned();

    let body = body
        .collect()
        .await
        .map_err(|e| {
            debug!(peer = %remote_addr, "failed to read request body: {e}");
            bad_request("unreadable request body")
        })?
        .to_bytes();

    let mut req = Request::new(parts.method, path)
        .with_headers(parts.headers)
        .with_body(body)
        .with_remote_addr(remote_addr);
    if let Some(query) = parts.uri.query() {
        req = req.with_query(query);
    }
    Ok(req)
}

fn bad_request(message: &'static str) -> Response {
    Response::builder().status(StatusCode::BAD_REQUEST).text(message)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on SIGTERM or Ctrl-C (Ctrl-C only off Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

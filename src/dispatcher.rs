//! Request dispatch and fault mapping.
//!
//! ```text
//! Request ─▶ Router::resolve ─┬─ NoMatch ──────────────▶ 404
//!                             ├─ MethodNotAllowed ─────▶ 405 + Allow
//!                             └─ Matched ─▶ handler ─┬─ Ok(response) ──▶ as is
//!                                                    ├─ Fault::Http ───▶ as is
//!                                                    └─ Fault::Internal / panic ─▶ 500
//! ```
//!
//! Handlers run in their own task so that a panic is caught here and turned
//! into a `500` like any other internal fault. In production mode a `500`
//! never carries detail; in test mode its body shows the error chain.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http::header::ALLOW;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::config::AppConfig;
use crate::error::{Error, Fault};
use crate::handler::Registry;
use crate::json::JsonEncoder;
use crate::method::Method;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::router::{Endpoint, Resolution, Router};
use crate::signer::{SignError, Signer};
use crate::store::{Comment, CommentStore, StoreError};
use crate::{admin, comment};

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything a handler may use. Built once, shared read-only.
pub struct Context {
    config: AppConfig,
    signer: Signer,
    store: Arc<dyn CommentStore>,
    encoder: JsonEncoder,
}

impl Context {
    pub fn new(config: AppConfig, store: Arc<dyn CommentStore>) -> Self {
        let signer = Signer::new(&config.secret_key);
        let encoder = JsonEncoder::new().register::<Comment, _>(comment::encoder(config.markup.renderer()));
        Self { config, signer, store, encoder }
    }

    pub fn config(&self) -> &AppConfig { &self.config }
    pub fn signer(&self) -> &Signer { &self.signer }
    pub fn encoder(&self) -> &JsonEncoder { &self.encoder }

    /// Runs `f` against the comment store on the blocking pool.
    pub async fn store<F, T>(&self, f: F) -> Result<T, Fault>
    where
        F: FnOnce(&dyn CommentStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(store.as_ref())).await??)
    }

    /// Issues a token with the configured key.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<String, Fault> {
        Ok(self.signer.sign(payload)?)
    }

    /// Verifies a token against the configured key and max-age.
    pub fn unsign<T: DeserializeOwned>(&self, token: &str) -> Result<T, SignError> {
        self.signer.unsign(token, self.config.max_age)
    }

    pub fn max_age(&self) -> Duration { self.config.max_age }
}

// ── Route table ───────────────────────────────────────────────────────────────

/// The service's fixed route table.
pub fn url_map() -> Result<Router, Error> {
    Router::new()
        // moderation panel
        .route("/", &[Method::Get, Method::Post], "admin.index")?
        // comment API; the transport has already percent-decoded the path
        .route("/comment/<path:path>/", &[Method::Get], "comment.get")?
        .route("/comment/<path:path>/new", &[Method::Post], "comment.create")?
        .route("/comment/<path:path>/<int:id>", &[Method::Get], "comment.get")?
        .route("/comment/<path:path>/<int:id>", &[Method::Put, Method::Delete], "comment.modify")
}

/// Handlers for every endpoint in [`url_map`].
pub fn endpoints() -> Registry {
    Registry::new()
        .register("admin.index", admin::index)
        .register("comment.get", comment::get)
        .register("comment.create", comment::create)
        .register("comment.modify", comment::modify)
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Routes requests and maps every outcome to a response.
pub struct Dispatcher {
    ctx: Arc<Context>,
    router: Router,
    registry: Registry,
}

impl Dispatcher {
    /// Fails if any route names an endpoint `registry` does not know.
    pub fn new(ctx: Context, router: Router, registry: Registry) -> Result<Self, Error> {
        registry.validate(&router)?;
        Ok(Self { ctx: Arc::new(ctx), router, registry })
    }

    pub fn context(&self) -> &Arc<Context> { &self.ctx }

    pub async fn handle(&self, req: Request) -> Response {
        let resolution = self.router.resolve(req.method().as_str(), req.path());
        let matched = match resolution {
            Resolution::Matched(matched) => matched,
            Resolution::NoMatch => {
                debug!(path = %req.path(), "no route");
                return Response::builder().status(StatusCode::NOT_FOUND).text("Not Found");
            }
            Resolution::MethodNotAllowed(allowed) => {
                debug!(method = %req.method(), path = %req.path(), %allowed, "method not allowed");
                return Response::builder()
                    .status(StatusCode::METHOD_NOT_ALLOWED)
                    .header(ALLOW.as_str(), allowed.to_string())
                    .text("Method Not Allowed");
            }
        };

        let Some(handler) = self.registry.get(&matched.endpoint) else {
            // `Registry::validate` ran in `new`, so this cannot happen.
            let err = Error::UnknownEndpoint(matched.endpoint.to_string());
            return self.internal_error(&matched.endpoint, &err);
        };

        let task = tokio::spawn(handler.call(Arc::clone(&self.ctx), matched.params, req));
        match task.await {
            Ok(Ok(response)) => response,
            Ok(Err(Fault::Http(err))) => err.into_response(),
            Ok(Err(Fault::Internal(err))) => self.internal_error(&matched.endpoint, err.as_ref()),
            Err(join) => self.internal_error(&matched.endpoint, &join),
        }
    }

    fn internal_error(&self, endpoint: &Endpoint, err: &(dyn StdError + 'static)) -> Response {
        error!(%endpoint, error = %err, "handler failed");

        let mut body = String::from("Internal Server Error");
        if !self.ctx.config.production {
            let mut source = Some(err);
            while let Some(e) = source {
                let _ = write!(body, "\n{e}");
                source = e.source();
            }
        }
        Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).text(body)
    }
}

/// Builds the service: context, route table and handlers.
pub fn app(config: AppConfig, store: Arc<dyn CommentStore>) -> Result<Dispatcher, Error> {
    Dispatcher::new(Context::new(config, store), url_map()?, endpoints())
}

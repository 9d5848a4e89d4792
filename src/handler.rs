//! Handler trait, type erasure and the endpoint registry.
//!
//! # How async handlers are stored
//!
//! The [`Registry`] holds handlers of *different* concrete types in one map,
//! so each is erased behind `dyn ErasedHandler`:
//!
//! ```text
//! async fn get(ctx, params, req) -> Result<Response, Fault>   ← handler
//!        ↓ Registry::new().register("comment.get", get)
//! get.into_boxed_handler()                                    ← blanket impl
//!        ↓
//! Arc::new(FnHandler(get))         stored as BoxedHandler = Arc<dyn ErasedHandler>
//!        ↓
//! handler.call(ctx, params, req)   at request time: one vtable dispatch
//! ```
//!
//! Every endpoint named in the route table must be registered;
//! [`Registry::validate`] checks that before the first request is served.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dispatcher::Context;
use crate::error::{Error, Fault};
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::router::{Endpoint, Params, Router};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased handler future.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Result<Response, Fault>> + Send + 'static>>;

#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Arc<Context>, params: Params, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid endpoint handler:
///
/// ```text
/// async fn name(ctx: Arc<Context>, params: Params, req: Request)
///     -> Result<impl IntoResponse, Fault>
/// ```
///
/// Sealed; only the blanket impl below satisfies it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Arc<Context>, Params, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Arc<Context>, Params, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Arc<Context>, Params, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, Fault>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, ctx: Arc<Context>, params: Params, req: Request) -> BoxFuture {
        let fut = (self.0)(ctx, params, req);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// `module.function` → handler.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<String, BoxedHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `endpoint`, replacing any earlier one.
    #[must_use]
    pub fn register(mut self, endpoint: &str, handler: impl Handler) -> Self {
        self.handlers.insert(endpoint.to_owned(), handler.into_boxed_handler());
        self
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.handlers.contains_key(endpoint)
    }

    pub(crate) fn get(&self, endpoint: &Endpoint) -> Option<BoxedHandler> {
        self.handlers.get(endpoint.as_str()).cloned()
    }

    /// Fails on the first route whose endpoint has no handler.
    pub fn validate(&self, router: &Router) -> Result<(), Error> {
        router
            .routes()
            .iter()
            .map(|route| route.endpoint())
            .find(|endpoint| !self.contains(endpoint.as_str()))
            .map_or(Ok(()), |missing| Err(Error::UnknownEndpoint(missing.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    async fn ok(_: Arc<Context>, _: Params, _: Request) -> Result<Response, Fault> {
        Ok(Response::text("ok"))
    }

    #[test]
    fn validation_names_the_missing_endpoint() {
        let router = Router::new()
            .route("/a", &[Method::Get], "a.index").unwrap()
            .route("/b", &[Method::Get], "b.index").unwrap();

        let partial = Registry::new().register("a.index", ok);
        match partial.validate(&router) {
            Err(Error::UnknownEndpoint(name)) => assert_eq!(name, "b.index"),
            other => panic!("expected UnknownEndpoint, got {other:?}"),
        }
        assert!(partial.register("b.index", ok).validate(&router).is_ok());
    }
}

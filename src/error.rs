//! Error types.
//!
//! Two families live here:
//!
//! - [`Error`] covers startup and infrastructure failures: binding a port,
//!   building the route table, loading configuration, opening the store.
//!   These end the process (or never let it start).
//! - [`Fault`] is what a request handler returns when it cannot produce a
//!   normal [`Response`](crate::Response). The dispatcher turns every fault
//!   into a response; a fault never escapes the request.

use std::borrow::Cow;

use http::StatusCode;

use crate::config::ConfigError;
use crate::migrate::ImportError;
use crate::response::{IntoResponse, Response};
use crate::signer::SignError;
use crate::store::StoreError;

/// Boxed error used for internal faults.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Startup and infrastructure errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route `{pattern}`: {reason}")]
    Route { pattern: String, reason: String },

    #[error("invalid endpoint identifier `{0}`, expected `module.function`")]
    Endpoint(String),

    #[error("endpoint `{0}` has no registered handler")]
    UnknownEndpoint(String),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("import: {0}")]
    Import(#[from] ImportError),

    #[error("no storage location configured")]
    MissingStorage,
}

impl Error {
    pub(crate) fn route(pattern: &str, reason: impl Into<String>) -> Self {
        Self::Route { pattern: pattern.to_owned(), reason: reason.into() }
    }
}

// ── HttpError ─────────────────────────────────────────────────────────────────

/// A fault that already knows its client-visible status.
///
/// The dispatcher sends these back verbatim.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    status: StatusCode,
    message: Cow<'static, str>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Authorization failure. The body is identical for every cause so a
    /// client cannot tell a forged token from an expired one.
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found")
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        Response::builder().status(self.status).text(self.message)
    }
}

// ── Fault ─────────────────────────────────────────────────────────────────────

/// The error half of a handler's result.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    /// Recoverable, HTTP-intent fault. Passed through unmodified.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Anything unexpected. Becomes a generic `500`.
    #[error(transparent)]
    Internal(BoxError),
}

impl Fault {
    pub fn internal(err: impl Into<BoxError>) -> Self {
        Self::Internal(err.into())
    }
}

impl From<SignError> for Fault {
    fn from(_: SignError) -> Self {
        Self::Http(HttpError::forbidden())
    }
}

impl From<StoreError> for Fault {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::Http(HttpError::not_found()),
            StoreError::InvalidParent(_) => Self::Http(HttpError::bad_request(err.to_string())),
            other => Self::internal(other),
        }
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err)
    }
}

impl From<tokio::task::JoinError> for Fault {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(err)
    }
}

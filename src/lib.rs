//! # glosa
//!
//! The request-handling core of a self-hosted comment service.
//!
//! A page embeds a script that talks to glosa's JSON API; comments live in
//! threads keyed by the page's URL path. Commenters have no accounts: creating
//! a comment returns a signed, expiring token, and presenting it later is the
//! only way to edit or delete that comment.
//!
//! ## Pieces
//!
//! - [`Router`]: ordered `(pattern, methods, endpoint)` rules with typed
//!   placeholders (`<path:path>`, `<int:id>`); first match wins.
//! - [`Signer`]: stateless HMAC-SHA256 tokens with a timestamp and max-age.
//! - [`Dispatcher`]: resolves a [`Request`], runs the endpoint's handler and
//!   maps every outcome (including panics) to a [`Response`].
//! - [`Server`]: hyper transport, static assets and graceful shutdown.
//!
//! Storage, markup rendering and migration are traits
//! ([`CommentStore`], [`MarkupRenderer`], [`MigrationImporter`]) with one
//! bundled implementation each.
//!
//! ## Driving the dispatcher directly
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use glosa::{AppConfig, FileStore, Request};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), glosa::Error> {
//! let app = glosa::app(AppConfig::development(), Arc::new(FileStore::in_memory()?))?;
//!
//! let res = app
//!     .handle(Request::new(http::Method::POST, "/comment/blog/hello/new").with_body(r#"{"text":"Hi!"}"#))
//!     .await;
//! assert_eq!(res.status_code(), http::StatusCode::CREATED);
//! assert!(res.header("x-glosa-token").is_some());
//! # Ok(())
//! # }
//! ```

mod admin;
mod comment;
mod config;
mod converter;
mod dispatcher;
mod error;
mod handler;
mod json;
mod markup;
mod method;
mod migrate;
mod request;
mod response;
mod router;
mod server;
mod signer;
mod static_files;
mod store;

pub use comment::{TOKEN_HEADER, cookie_name};
pub use config::{AppConfig, ConfigError, Overrides};
pub use converter::{Converter, Converters, IntConverter, PathConverter, SegmentKind, StringConverter, Value};
pub use dispatcher::{Context, Dispatcher, app, endpoints, url_map};
pub use error::{BoxError, Error, Fault, HttpError};
pub use handler::{Handler, Registry};
pub use json::JsonEncoder;
pub use markup::{Markdown, MarkupEngine, MarkupRenderer, Paragraphs, Plain};
pub use method::{Method, MethodSet};
pub use migrate::{Disqus, ImportError, ImportSummary, MigrationImporter};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{Endpoint, MatchResult, Params, Resolution, Route, Router};
pub use server::Server;
pub use signer::{SignError, Signer};
pub use static_files::StaticFiles;
pub use store::{Comment, CommentStore, CommentUpdate, FileStore, Mode, NewComment, StoreError};

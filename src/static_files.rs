//! Static asset layer mounted under `/static/`, in front of the dispatcher.

use std::io;
use std::path::{Path, PathBuf};

use http::StatusCode;
use http::header::ALLOW;
use tracing::{debug, warn};

use crate::request::Request;
use crate::response::{ContentType, Response};

/// URL prefix this layer answers for.
pub const PREFIX: &str = "/static/";

/// Serves files below `root`.
#[derive(Clone, Debug)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Whether `path` (decoded) belongs to this layer.
    pub fn handles(path: &str) -> bool {
        path.starts_with(PREFIX)
    }

    pub async fn serve(&self, req: &Request) -> Response {
        let method = req.method();
        if method != http::Method::GET && method != http::Method::HEAD {
            return Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(ALLOW.as_str(), "GET, HEAD")
                .text("Method Not Allowed");
        }

        let Some(relative) = req.path().strip_prefix(PREFIX).and_then(sanitize) else {
            debug!(path = %req.path(), "rejected static path");
            return not_found();
        };

        match self.load(&relative).await {
            Ok(Some(body)) => {
                let content_type = ContentType::from_extension(relative.extension().and_then(|e| e.to_str()));
                Response::builder().bytes(content_type, body)
            }
            Ok(None) => not_found(),
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "static file read failed");
                not_found()
            }
        }
    }

    /// `Ok(None)` when the file is missing, a directory or escapes `root`.
    async fn load(&self, relative: &Path) -> io::Result<Option<Vec<u8>>> {
        let root = tokio::fs::canonicalize(&self.root).await?;
        let file = match tokio::fs::canonicalize(root.join(relative)).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        // Symlinks may still point outside.
        if !file.starts_with(&root) || !tokio::fs::metadata(&file).await?.is_file() {
            return Ok(None);
        }
        tokio::fs::read(&file).await.map(Some)
    }
}

fn not_found() -> Response {
    Response::builder().status(StatusCode::NOT_FOUND).text("Not Found")
}

/// Relative path from URL segments; `None` on `..`, empty or odd segments.
fn sanitize(rest: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for segment in rest.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['\\', '\0', ':']) {
            return None;
        }
        out.push(segment);
    }
    Some(out)
}

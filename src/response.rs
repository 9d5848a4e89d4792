//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in your handler and return it. The transport turns it
//! into a hyper response at the very end.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use tracing::warn;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content types this service emits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,          // text/css
    Gif,          // image/gif
    Html,         // text/html; charset=utf-8
    Icon,         // image/x-icon
    Javascript,   // application/javascript
    Jpeg,         // image/jpeg
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Woff,         // font/woff
    Woff2,        // font/woff2
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css",
            Self::Gif         => "image/gif",
            Self::Html        => "text/html; charset=utf-8",
            Self::Icon        => "image/x-icon",
            Self::Javascript  => "application/javascript",
            Self::Jpeg        => "image/jpeg",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Woff        => "font/woff",
            Self::Woff2       => "font/woff2",
        }
    }

    /// Guess from a file extension, case-insensitively.
    pub fn from_extension(ext: Option<&str>) -> Self {
        let ext = ext.map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("css")          => Self::Css,
            Some("gif")          => Self::Gif,
            Some("html" | "htm") => Self::Html,
            Some("ico")          => Self::Icon,
            Some("js" | "mjs")   => Self::Javascript,
            Some("jpg" | "jpeg") => Self::Jpeg,
            Some("json" | "map") => Self::Json,
            Some("png")          => Self::Png,
            Some("svg")          => Self::Svg,
            Some("txt")          => Self::Text,
            Some("woff")         => Self::Woff,
            Some("woff2")        => Self::Woff2,
            _                    => Self::OctetStream,
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use glosa::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use glosa::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/comment/blog/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder()
///     .bytes(ContentType::Css, b"body{}".to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) status: StatusCode,
}

impl Response {
    /// `200 OK` with `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { body: Bytes::new(), headers: Vec::new(), status: code }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn body(&self) -> &[u8] { &self.body }

    /// First header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Converts into the hyper representation. `head_only` keeps the
    /// `content-length` of the body but sends none.
    pub(crate) fn into_http(self, head_only: bool) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(Bytes::new()));
        *res.status_mut() = self.status;

        let headers = res.headers_mut();
        for (name, value) in &self.headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "dropping invalid response header"),
            }
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));

        if !head_only {
            *res.body_mut() = Full::new(self.body);
        }
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Bytes::from(body.into()))
    }

    /// Terminate with a typed body.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, body.into())
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status }
    }

    fn finish(self, content_type: ContentType, body: Bytes) -> Response {
        let mut headers = vec![(CONTENT_TYPE.as_str().to_owned(), content_type.as_str().to_owned())];
        headers.extend(self.headers);
        Response { body, headers, status: self.status }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> Response {
        // Serializing a `Value` cannot fail: its map keys are always strings.
        Response::json(self.to_string())
    }
}

//! Ordered, pattern-based request router.
//!
//! Routes are tried in declaration order. The first one whose pattern matches
//! the path *and* whose method set contains the request method wins. When some
//! pattern matched the path but none accepted the method, the result is
//! [`Resolution::MethodNotAllowed`] carrying every method those routes allow.
//!
//! Patterns look like `/comment/<path:thread>/<int:id>`. Literal text must
//! match exactly. Placeholders are converted by the [`Converters`] registered
//! on the router. The router works on the already-decoded path and never
//! escapes or unescapes anything itself.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::converter::{Converter, Converters, SegmentKind, Value};
use crate::error::Error;
use crate::method::{Method, MethodSet};

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// A `module.function` name for a handler capability.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint(Cow<'static, str>);

impl Endpoint {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Result<Self, Error> {
        let name = name.into();
        let valid = name.split_once('.').is_some_and(|(module, function)| {
            !module.is_empty() && !function.is_empty() && !function.contains('.')
        });
        if valid {
            Ok(Self(name))
        } else {
            Err(Error::Endpoint(name.into_owned()))
        }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Params ────────────────────────────────────────────────────────────────────

/// Typed values extracted from the path, by placeholder name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params {
    values: Vec<(String, Value)>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// A string-valued placeholder. `None` if absent or not a string.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// An integer placeholder. `None` if absent or not an integer.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

// ── Pattern ───────────────────────────────────────────────────────────────────

enum Piece {
    Literal(String),
    Param { name: String, converter: Arc<dyn Converter> },
}

/// A parsed route pattern.
struct Pattern {
    source: String,
    pieces: Vec<Piece>,
}

impl Pattern {
    fn parse(source: &str, converters: &Converters) -> Result<Self, Error> {
        if !source.starts_with('/') {
            return Err(Error::route(source, "pattern must start with `/`"));
        }

        let mut pieces = Vec::new();
        let mut names: Vec<&str> = Vec::new();
        let mut rest = source;

        while !rest.is_empty() {
            let Some(open) = rest.find('<') else {
                pieces.push(Piece::Literal(rest.to_owned()));
                break;
            };
            if open > 0 {
                pieces.push(Piece::Literal(rest[..open].to_owned()));
            } else if matches!(pieces.last(), Some(Piece::Param { .. })) {
                return Err(Error::route(source, "placeholders must be separated by literal text"));
            }

            let close = rest[open..]
                .find('>')
                .map(|i| open + i)
                .ok_or_else(|| Error::route(source, "unterminated placeholder"))?;
            let spec = &rest[open + 1..close];
            let (tag, name) = spec.split_once(':').unwrap_or((Converters::DEFAULT_TAG, spec));

            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::route(source, format!("invalid placeholder name `{name}`")));
            }
            if names.contains(&name) {
                return Err(Error::route(source, format!("duplicate placeholder `{name}`")));
            }
            let converter = converters
                .get(tag)
                .ok_or_else(|| Error::route(source, format!("unknown converter `{tag}`")))?;

            names.push(name);
            pieces.push(Piece::Param { name: name.to_owned(), converter });
            rest = &rest[close + 1..];
        }

        Ok(Self { source: source.to_owned(), pieces })
    }

    fn matches(&self, path: &str) -> Option<Params> {
        let mut values = Vec::new();
        match_pieces(&self.pieces, path, &mut values).then_some(Params { values })
    }
}

/// Backtracking matcher. Each placeholder tries its longest admissible
/// capture first and gives characters back until the rest of the pattern
/// matches. A capture is converted only once the rest has matched, so long
/// greedy paths are not copied at every candidate split.
fn match_pieces(pieces: &[Piece], input: &str, out: &mut Vec<(String, Value)>) -> bool {
    let Some((first, rest)) = pieces.split_first() else {
        return input.is_empty();
    };

    match first {
        Piece::Literal(lit) => input
            .strip_prefix(lit.as_str())
            .is_some_and(|tail| match_pieces(rest, tail, out)),

        Piece::Param { name, converter } => {
            let limit = match converter.kind() {
                SegmentKind::Single => input.find('/').unwrap_or(input.len()),
                SegmentKind::Greedy => input.len(),
            };
            let next_literal = match rest.first() {
                Some(Piece::Literal(lit)) => Some(lit.as_str()),
                _ => None,
            };

            for end in (1..=limit).rev() {
                if !input.is_char_boundary(end) {
                    continue;
                }
                let (raw, tail) = input.split_at(end);
                if rest.is_empty() && !tail.is_empty() {
                    continue;
                }
                if next_literal.is_some_and(|lit| !tail.starts_with(lit)) {
                    continue;
                }

                let mark = out.len();
                if !match_pieces(rest, tail, out) {
                    continue;
                }
                if let Some(value) = converter.convert(raw) {
                    out.insert(mark, (name.clone(), value));
                    return true;
                }
                out.truncate(mark);
            }
            false
        }
    }
}

// ── Route / Resolution ────────────────────────────────────────────────────────

/// One row of the route table.
pub struct Route {
    pattern: Pattern,
    methods: MethodSet,
    endpoint: Endpoint,
}

impl Route {
    pub fn endpoint(&self) -> &Endpoint { &self.endpoint }
}

/// A successful resolution.
#[derive(Debug)]
pub struct MatchResult {
    pub endpoint: Endpoint,
    pub params: Params,
}

/// Outcome of [`Router::resolve`].
#[derive(Debug)]
pub enum Resolution {
    Matched(MatchResult),
    NoMatch,
    /// The path exists, but not for this method. Carries what is allowed.
    MethodNotAllowed(MethodSet),
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The route table.
///
/// Build it once at startup and share it read-only. Each [`Router::route`]
/// call returns `self` so registrations chain with `?`:
///
/// ```rust
/// # use glosa::{Method, Router};
/// # fn main() -> Result<(), glosa::Error> {
/// let router = Router::new()
///     .route("/comment/<path:path>/", &[Method::Get], "comment.get")?
///     .route("/comment/<path:path>/<int:id>", &[Method::Put, Method::Delete], "comment.modify")?;
/// # Ok(()) }
/// ```
pub struct Router {
    routes: Vec<Route>,
    converters: Converters,
}

impl Router {
    /// A router with the default `string`, `int` and `path` converters.
    pub fn new() -> Self {
        Self::with_converters(Converters::default())
    }

    pub fn with_converters(converters: Converters) -> Self {
        Self { routes: Vec::new(), converters }
    }

    /// Registers a converter tag for patterns added after this call.
    #[must_use]
    pub fn converter(mut self, tag: &str, converter: impl Converter) -> Self {
        self.converters.insert(tag, converter);
        self
    }

    /// Appends a route. Fails on a malformed pattern, an unknown converter
    /// tag, an empty method list or a malformed endpoint name.
    pub fn route(
        mut self,
        pattern: &str,
        methods: &[Method],
        endpoint: &'static str,
    ) -> Result<Self, Error> {
        if methods.is_empty() {
            return Err(Error::route(pattern, "no methods given"));
        }
        self.routes.push(Route {
            pattern: Pattern::parse(pattern, &self.converters)?,
            methods: methods.iter().copied().collect(),
            endpoint: Endpoint::new(endpoint)?,
        });
        Ok(self)
    }

    pub fn routes(&self) -> &[Route] { &self.routes }

    /// Resolves a request line. `method` is the raw wire string; methods the
    /// crate does not know are never allowed.
    pub fn resolve(&self, method: &str, path: &str) -> Resolution {
        let method = method.parse::<Method>().ok();
        let mut allowed = MethodSet::empty();

        for route in &self.routes {
            let Some(params) = route.pattern.matches(path) else { continue };
            if method.is_some_and(|m| route.methods.contains(m)) {
                debug!(pattern = %route.pattern.source, endpoint = %route.endpoint, "route matched");
                return Resolution::Matched(MatchResult { endpoint: route.endpoint.clone(), params });
            }
            allowed = allowed.union(route.methods);
        }

        if allowed.is_empty() {
            Resolution::NoMatch
        } else {
            Resolution::MethodNotAllowed(allowed)
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

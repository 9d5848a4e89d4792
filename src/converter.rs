//! Placeholder converters.
//!
//! A route pattern names each placeholder's converter by tag:
//! `<name>` / `<string:name>`, `<int:name>`, `<path:name>`. A converter says
//! how much of the path it may consume ([`SegmentKind`]) and turns the raw
//! text into a typed [`Value`], or refuses it.
//!
//! New tags are added by inserting into a [`Converters`] map; the matcher in
//! [`router`](crate::router) never needs to change.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A typed placeholder value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

/// How much of the path a placeholder may span.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentKind {
    /// One non-empty segment, never containing `/`.
    Single,
    /// One or more characters, slashes included. Longest match wins.
    Greedy,
}

/// Validation and conversion for one placeholder type.
pub trait Converter: Send + Sync + 'static {
    fn kind(&self) -> SegmentKind {
        SegmentKind::Single
    }

    /// Returns `None` to reject `raw`. The matcher then tries a shorter
    /// capture (greedy kinds) or the next route.
    fn convert(&self, raw: &str) -> Option<Value>;
}

/// Any single segment, kept as a string.
pub struct StringConverter;

impl Converter for StringConverter {
    fn convert(&self, raw: &str) -> Option<Value> {
        Some(Value::Str(raw.to_owned()))
    }
}

/// Decimal digits only, no sign, must fit in an `i64`.
pub struct IntConverter;

impl Converter for IntConverter {
    fn convert(&self, raw: &str) -> Option<Value> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse().ok().map(Value::Int)
    }
}

/// The rest of the path, slashes included.
pub struct PathConverter;

impl Converter for PathConverter {
    fn kind(&self) -> SegmentKind {
        SegmentKind::Greedy
    }

    fn convert(&self, raw: &str) -> Option<Value> {
        Some(Value::Str(raw.to_owned()))
    }
}

// ── Converters ────────────────────────────────────────────────────────────────

/// Tag → converter map consulted when a pattern is parsed.
#[derive(Clone)]
pub struct Converters {
    map: HashMap<String, Arc<dyn Converter>>,
}

impl Converters {
    /// The tag used for `<name>` placeholders that do not name one.
    pub const DEFAULT_TAG: &'static str = "string";

    /// A map with no converters at all, not even the default one.
    pub fn empty() -> Self {
        Self { map: HashMap::new() }
    }

    /// Registers (or replaces) the converter for `tag`.
    pub fn insert(&mut self, tag: impl Into<String>, converter: impl Converter) {
        self.map.insert(tag.into(), Arc::new(converter));
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Converter>> {
        self.map.get(tag).cloned()
    }
}

/// `string`, `int` and `path`.
impl Default for Converters {
    fn default() -> Self {
        let mut converters = Self::empty();
        converters.insert(Self::DEFAULT_TAG, StringConverter);
        converters.insert("int", IntConverter);
        converters.insert("path", PathConverter);
        converters
    }
}

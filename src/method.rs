//! HTTP method as a typed enum, plus a compact set of methods per route.
//!
//! Only the RFC 9110 methods are known. Anything else parses to an error and
//! can never be allowed by a route, so the router answers it with
//! `405 Method Not Allowed` when the path exists.

use std::fmt;
use std::str::FromStr;

/// A known HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    const ALL: [Method; 9] = [
        Self::Get,
        Self::Head,
        Self::Post,
        Self::Put,
        Self::Delete,
        Self::Patch,
        Self::Options,
        Self::Connect,
        Self::Trace,
    ];

    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
        }
    }

    fn bit(self) -> u16 {
        match self {
            Self::Get     => 1 << 0,
            Self::Head    => 1 << 1,
            Self::Post    => 1 << 2,
            Self::Put     => 1 << 3,
            Self::Delete  => 1 << 4,
            Self::Patch   => 1 << 5,
            Self::Options => 1 << 6,
            Self::Connect => 1 << 7,
            Self::Trace   => 1 << 8,
        }
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "DELETE"  => Ok(Self::Delete),
            "GET"     => Ok(Self::Get),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "TRACE"   => Ok(Self::Trace),
            _         => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── MethodSet ─────────────────────────────────────────────────────────────────

/// A set of methods, stored as a bitmask.
///
/// Adding `GET` also adds `HEAD`: a resource that can be fetched can always
/// be asked for its headers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MethodSet(u16);

impl MethodSet {
    pub const fn empty() -> Self { Self(0) }

    pub fn contains(self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }

    pub fn insert(&mut self, method: Method) {
        self.0 |= method.bit();
        if method == Method::Get {
            self.0 |= Method::Head.bit();
        }
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self { Self(self.0 | other.0) }

    pub fn is_empty(self) -> bool { self.0 == 0 }

    /// Methods in a stable order: `GET, HEAD, POST, PUT, DELETE, ...`.
    pub fn iter(self) -> impl Iterator<Item = Method> {
        Method::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<Method> for MethodSet {
    fn from_iter<I: IntoIterator<Item = Method>>(iter: I) -> Self {
        let mut set = Self::empty();
        for method in iter {
            set.insert(method);
        }
        set
    }
}

/// Formats as the value of an `Allow` header: `GET, HEAD, PUT`.
impl fmt::Display for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, method) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(method.as_str())?;
        }
        Ok(())
    }
}

//! Request value object.

use std::fmt;

use bytes::Bytes;
use http::Uri;

use crate::message::{Message, Parts};

/// The target of a request: a parsed URI, or the raw text when it does not parse.
///
/// Parsing never fails loudly. A malformed target degrades to
/// [`Target::Invalid`], whose accessors answer with empty values, so one bad
/// inbound request cannot take the pipeline down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Parsed(Uri),
    Invalid(String),
}

impl Target {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<Uri>() {
            Ok(uri) => Self::Parsed(uri),
            Err(_) => Self::Invalid(raw.to_owned()),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Parsed(uri) => uri.path(),
            Self::Invalid(_) => "",
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Parsed(uri) => uri.host(),
            Self::Invalid(_) => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Parsed(uri) => uri.port_u16(),
            Self::Invalid(_) => None,
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            Self::Parsed(uri) => uri.query(),
            Self::Invalid(_) => None,
        }
    }

    pub fn scheme(&self) -> Option<&str> {
        match self {
            Self::Parsed(uri) => uri.scheme_str(),
            Self::Invalid(_) => None,
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::Invalid(String::new())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed(uri) => write!(f, "{uri}"),
            Self::Invalid(raw) => f.write_str(raw),
        }
    }
}

/// One side of an exchange: the call being made or received.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    method: String,
    target: Target,
    parts: Parts,
}

impl Request {
    /// Builds a request. The method is upper-cased; the target is parsed
    /// best-effort.
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            target: Target::parse(target),
            parts: Parts::default(),
        }
    }

    /// Builder-style header registration.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parts.headers.append(name, value);
        self
    }

    /// Builder-style body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.parts.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: &str) {
        self.method = method.to_ascii_uppercase();
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn set_target(&mut self, target: Target) {
        self.target = target;
    }

    /// Shortcut for `self.target().path()`.
    pub fn path(&self) -> &str {
        self.target.path()
    }

    /// Returns a copy of this request pointed at `target`.
    ///
    /// Unless `preserve_host` is set and a `Host` header already exists, the
    /// `Host` header is rewritten from the new target and moved to the front
    /// of the header list.
    #[must_use]
    pub fn with_target(&self, target: Target, preserve_host: bool) -> Self {
        if target == self.target {
            return self.clone();
        }
        let mut new = self.clone();
        new.target = target;
        if !preserve_host || !self.parts.headers.contains("host") {
            new.update_host_from_target();
        }
        new
    }

    fn update_host_from_target(&mut self) {
        let Some(host) = self.target.host() else { return };
        if host.is_empty() {
            return;
        }
        let value = match self.target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        let name = if self.parts.headers.contains("host") { "host" } else { "Host" };
        self.parts.headers.prepend(name, value);
    }

    /// Adapts a request delivered by an `http`-based transport.
    pub fn from_http(req: http::Request<Bytes>) -> Self {
        let (head, body) = req.into_parts();
        let mut request = Self {
            method: head.method.as_str().to_owned(),
            target: Target::Parsed(head.uri),
            parts: Parts { version: version_str(head.version).to_owned(), body, ..Parts::default() },
        };
        for (name, value) in &head.headers {
            request.parts.headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        request
    }
}

impl Message for Request {
    fn parts(&self) -> &Parts {
        &self.parts
    }

    fn parts_mut(&mut self) -> &mut Parts {
        &mut self.parts
    }
}

pub(crate) fn version_str(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_09 => "0.9",
        http::Version::HTTP_10 => "1.0",
        http::Version::HTTP_2 => "2",
        http::Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

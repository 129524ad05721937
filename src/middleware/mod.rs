//! Built-in filters.
//!
//! Every filter exists in a server flavour, for inbound requests, and a
//! client flavour, for outbound calls. The default chain, outermost first:
//!
//! | name         | filter              | does                                        |
//! |--------------|---------------------|---------------------------------------------|
//! | `request_id` | [`RequestIdFilter`] | seeds `X-Request-Id`, the trace id and debug |
//! | `metadata`   | [`MetadataFilter`]  | moves `x-md-*` headers in or out of the store |
//! | `trace`      | [`TraceFilter`]     | one span per call, B3 in or out             |
//! | `logging`    | [`LoggingFilter`]   | one access log line per call                |
//!
//! The trace and logging filters share one policy: a call is *interesting*
//! when it is slow, when the scope is in debug mode, or when it ends with a
//! business error. Interesting calls get their headers and bodies captured
//! whatever the static capture flags say.

mod logging;
mod metadata;
mod request_id;
mod trace;

use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::{CaptureConfig, MiddlewareConfig, SideConfig};
use crate::context::Context;
use crate::error::{Error, Outcome, Result};
use crate::header_filter::HeaderFilter;
use crate::message::{Headers, Message};
use crate::pipeline::{Next, Options};
use crate::request::Request;
use crate::response::Response;
use crate::scope::Scope;

pub use logging::LoggingFilter;
pub use metadata::MetadataFilter;
pub use request_id::RequestIdFilter;
pub use trace::TraceFilter;

/// Request id header.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Turns on debug mode for the whole call tree.
pub const DEBUG_HEADER: &str = "Mp-Debug";

/// Trace id echoed on server responses, next to `X-B3-TraceId`.
pub const TRACE_ID_RESPONSE_HEADER: &str = "X-Trace-Id";

/// One stage of a [`Pipeline`](crate::Pipeline).
///
/// A filter may work on the context before calling `next.run(..)`, skip
/// `next` entirely, or inspect the outcome afterwards. A filter that sees an
/// `Err` may record it but must return that same `Err`.
pub trait Filter<T>: Send + Sync {
    /// Registry name, also used in debug output.
    fn name(&self) -> &str;

    fn handle(&self, ctx: &mut Context, scope: &mut Scope, next: Next<'_, T>, options: &Options) -> Outcome<T>;
}

/// Which side of an exchange a filter sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Inbound requests.
    Server,
    /// Outbound calls.
    Client,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }

    /// This side's section of the middleware configuration.
    pub fn config(self, config: &MiddlewareConfig) -> &SideConfig {
        match self {
            Self::Server => &config.server,
            Self::Client => &config.client,
        }
    }
}

/// Milliseconds between `start` and `end`, rounded to two decimals.
///
/// A clock that went backwards counts as zero.
pub fn latency_ms(start: SystemTime, end: SystemTime) -> f64 {
    let ms = end.duration_since(start).unwrap_or_default().as_secs_f64() * 1000.0;
    (ms * 100.0).round() / 100.0
}

/// Records how the rest of the chain ended as the context's business result.
///
/// A failure becomes its `(code, message)`. A server reply with a JSON
/// envelope contributes its `code` and `msg`. Both obey first-failure-wins,
/// so running this from several filters is harmless.
pub(crate) fn settle<T>(ctx: &mut Context, side: Side, outcome: &Outcome<T>) {
    match outcome {
        Err(err) => {
            let (code, message) = err.to_biz_result();
            ctx.set_biz_result(code, message);
        }
        Ok(_) if side == Side::Server => {
            if let Some(content) = ctx.response().data() {
                ctx.set_biz_content(&content);
            }
        }
        Ok(_) => {}
    }
}

/// A captured body: its size always, its content only when small enough.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Body {
    pub(crate) size: usize,
    pub(crate) content: Option<String>,
}

/// Capture policy shared by the trace and logging filters.
#[derive(Debug)]
pub(crate) struct Capture {
    config: CaptureConfig,
    excluded: GlobSet,
    headers: HeaderFilter,
}

impl Capture {
    pub(crate) fn new(config: CaptureConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.excluded_paths {
            let glob = Glob::new(pattern)
                .map_err(|source| Error::InvalidGlob { pattern: pattern.clone(), source })?;
            builder.add(glob);
        }
        let excluded = builder
            .build()
            .map_err(|source| Error::InvalidGlob { pattern: config.excluded_paths.join(","), source })?;
        let headers = HeaderFilter::new(
            &config.allowed_headers,
            &config.sensitive_headers,
            &config.sensitive_input,
        );
        Ok(Self { config, excluded, headers })
    }

    pub(crate) fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// `true` when the filter is disabled or `path` is excluded.
    ///
    /// Globs are tried against the path with and without its leading `/`.
    pub(crate) fn skips(&self, path: &str) -> bool {
        self.config.disabled
            || self.excluded.is_match(path)
            || self.excluded.is_match(path.trim_start_matches('/'))
    }

    pub(crate) fn is_slow(&self, latency: f64) -> bool {
        latency > self.config.latency_threshold
    }

    pub(crate) fn interested(&self, ctx: &Context, scope: &Scope, latency: f64) -> bool {
        self.is_slow(latency) || scope.debug || ctx.is_error()
    }

    /// Filtered request headers as an aligned block, when they are wanted.
    pub(crate) fn request_headers(&self, request: &Request, interested: bool) -> Option<String> {
        self.render_headers(request.headers(), interested || self.config.request_headers)
    }

    pub(crate) fn response_headers(&self, response: &Response, interested: bool) -> Option<String> {
        self.render_headers(response.headers(), interested || self.config.response_headers)
    }

    fn render_headers(&self, headers: &Headers, wanted: bool) -> Option<String> {
        if !wanted || headers.is_empty() {
            return None;
        }
        Some(self.headers.transformed_headers(&self.headers.filter_headers(headers)))
    }

    /// The request body with sensitive fields masked.
    ///
    /// A JSON object body is redacted field by field; anything else is kept
    /// as text.
    pub(crate) fn request_body(&self, request: &Request, interested: bool) -> Option<Body> {
        if !(interested || self.config.request_body) || request.body_size() == 0 {
            return None;
        }
        let size = request.body_size();
        let content = self.fits(size, self.config.request_body_max_size).then(|| match request.data() {
            Some(serde_json::Value::Object(fields)) => {
                serde_json::Value::Object(self.headers.filter_input(&fields)).to_string()
            }
            _ => request.body_str().into_owned(),
        });
        Some(Body { size, content })
    }

    pub(crate) fn response_body(&self, response: &Response, interested: bool) -> Option<Body> {
        if !(interested || self.config.response_body) || response.body_size() == 0 {
            return None;
        }
        let size = response.body_size();
        let content = self
            .fits(size, self.config.response_body_max_size)
            .then(|| response.body_str().into_owned());
        Some(Body { size, content })
    }

    fn fits(&self, size: usize, max: usize) -> bool {
        max > 0 && size <= max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn capture(config: CaptureConfig) -> Capture {
        Capture::new(config).unwrap()
    }

    #[test]
    fn latency_is_rounded_to_two_decimals() {
        let start = SystemTime::UNIX_EPOCH;
        assert_eq!(latency_ms(start, start + Duration::from_micros(1_234_567)), 1234.57);
        assert_eq!(latency_ms(start + Duration::from_secs(1), start), 0.0);
    }

    #[test]
    fn excluded_paths_match_with_or_without_slash() {
        let c = capture(CaptureConfig { excluded_paths: vec!["health".into(), "/metrics/*".into()], ..Default::default() });
        assert!(c.skips("/health"));
        assert!(c.skips("/metrics/cpu"));
        assert!(!c.skips("/orders"));

        let c = capture(CaptureConfig { disabled: true, ..Default::default() });
        assert!(c.skips("/orders"));
    }

    #[test]
    fn invalid_glob_fails_construction() {
        let err = Capture::new(CaptureConfig { excluded_paths: vec!["a[".into()], ..Default::default() }).unwrap_err();
        assert!(matches!(err, Error::InvalidGlob { pattern, .. } if pattern == "a["));
    }

    #[test]
    fn interest_comes_from_latency_debug_or_errors() {
        let c = capture(CaptureConfig::default());
        let mut ctx = Context::default();
        let mut scope = Scope::default();
        assert!(!c.interested(&ctx, &scope, 10.0));
        assert!(c.interested(&ctx, &scope, 3000.01));

        scope.debug = true;
        assert!(c.interested(&ctx, &scope, 10.0));

        scope.debug = false;
        ctx.set_biz_code(1200);
        assert!(c.interested(&ctx, &scope, 10.0));
    }

    #[test]
    fn bodies_over_the_limit_keep_only_their_size() {
        let c = capture(CaptureConfig { request_body: true, request_body_max_size: 4, ..Default::default() });
        let small = Request::new("POST", "/").with_body("abc");
        let large = Request::new("POST", "/").with_body("abcdef");

        assert_eq!(c.request_body(&small, false), Some(Body { size: 3, content: Some("abc".into()) }));
        assert_eq!(c.request_body(&large, false), Some(Body { size: 6, content: None }));
    }

    #[test]
    fn request_bodies_are_redacted() {
        let c = capture(CaptureConfig::default());
        let req = Request::new("POST", "/login").with_body(r#"{"user":"ann","password":"hunter2"}"#);

        assert_eq!(c.request_body(&req, false), None);
        let body = c.request_body(&req, true).unwrap();
        let content = body.content.unwrap();
        assert!(!content.contains("hunter2"));
        assert!(content.contains(crate::header_filter::REDACTED));
    }

    #[test]
    fn headers_are_captured_only_when_wanted() {
        let c = capture(CaptureConfig { sensitive_headers: vec!["authorization".into()], ..Default::default() });
        let req = Request::new("GET", "/").with_header("Authorization", "Bearer x");

        assert_eq!(c.request_headers(&req, false), None);
        let block = c.request_headers(&req, true).unwrap();
        assert!(block.starts_with("Authorization:"));
        assert!(!block.contains("Bearer"));
    }
}

//! B3 multi-header propagation.
//!
//! ```text
//! X-B3-TraceId: 463ac35c9f6413ad48485a3953bb6124
//! X-B3-SpanId: a2fb4a1d1a96d312
//! X-B3-ParentSpanId: 0020000000000001
//! X-B3-Sampled: 1
//! X-B3-Flags: 1
//! ```

use crate::message::Headers;

pub const TRACE_ID_HEADER: &str = "X-B3-TraceId";
pub const SPAN_ID_HEADER: &str = "X-B3-SpanId";
pub const PARENT_SPAN_ID_HEADER: &str = "X-B3-ParentSpanId";
pub const SAMPLED_HEADER: &str = "X-B3-Sampled";
pub const FLAGS_HEADER: &str = "X-B3-Flags";

/// Identifiers and sampling flags of one span, as they cross a process boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    /// 16 or 32 lower-case hex characters.
    pub trace_id: String,
    /// 16 lower-case hex characters.
    pub span_id: String,
    pub parent_id: Option<String>,
    /// `None` defers the decision to the local sampler.
    pub sampled: Option<bool>,
    pub debug: bool,
}

/// Writes and reads trace context on a header carrier.
pub trait Propagation {
    fn inject(&self, context: &TraceContext, carrier: &mut Headers);

    /// Reads a context. Missing or malformed headers yield `None`.
    fn extract(&self, carrier: &Headers) -> Option<TraceContext>;
}

/// The multi-header B3 format.
#[derive(Clone, Copy, Debug, Default)]
pub struct B3;

impl Propagation for B3 {
    fn inject(&self, context: &TraceContext, carrier: &mut Headers) {
        carrier.replace(TRACE_ID_HEADER, context.trace_id.as_str());
        carrier.replace(SPAN_ID_HEADER, context.span_id.as_str());
        if let Some(parent) = &context.parent_id {
            carrier.replace(PARENT_SPAN_ID_HEADER, parent.as_str());
        }
        if context.debug {
            carrier.replace(FLAGS_HEADER, "1");
        } else if let Some(sampled) = context.sampled {
            carrier.replace(SAMPLED_HEADER, if sampled { "1" } else { "0" });
        }
    }

    fn extract(&self, carrier: &Headers) -> Option<TraceContext> {
        let trace_id = carrier.first(TRACE_ID_HEADER)?.trim();
        let span_id = carrier.first(SPAN_ID_HEADER)?.trim();
        if !(is_hex(trace_id, 16) || is_hex(trace_id, 32)) || !is_hex(span_id, 16) {
            return None;
        }
        let parent_id = match carrier.first(PARENT_SPAN_ID_HEADER).map(str::trim) {
            Some(p) if is_hex(p, 16) => Some(p.to_ascii_lowercase()),
            Some(_) => return None,
            None => None,
        };

        let mut debug = carrier.first(FLAGS_HEADER).map(str::trim) == Some("1");
        let sampled = match carrier.first(SAMPLED_HEADER).map(str::trim) {
            None => None,
            Some("1") | Some("true") => Some(true),
            Some("0") | Some("false") => Some(false),
            Some("d") => {
                debug = true;
                Some(true)
            }
            Some(_) => return None,
        };

        Some(TraceContext {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            parent_id,
            sampled: if debug { Some(true) } else { sampled },
            debug,
        })
    }
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().copied().collect()
    }

    #[test]
    fn extracts_full_context() {
        let ctx = B3
            .extract(&carrier(&[
                ("x-b3-traceid", "463AC35C9F6413AD48485A3953BB6124"),
                ("x-b3-spanid", "a2fb4a1d1a96d312"),
                ("x-b3-parentspanid", "0020000000000001"),
                ("x-b3-sampled", "1"),
            ]))
            .unwrap();

        assert_eq!(ctx.trace_id, "463ac35c9f6413ad48485a3953bb6124");
        assert_eq!(ctx.parent_id.as_deref(), Some("0020000000000001"));
        assert_eq!(ctx.sampled, Some(true));
        assert!(!ctx.debug);
    }

    #[test]
    fn flags_mark_debug() {
        let ctx = B3
            .extract(&carrier(&[
                ("X-B3-TraceId", "463ac35c9f6413ad"),
                ("X-B3-SpanId", "a2fb4a1d1a96d312"),
                ("X-B3-Sampled", "0"),
                ("X-B3-Flags", "1"),
            ]))
            .unwrap();
        assert!(ctx.debug);
        assert_eq!(ctx.sampled, Some(true));
    }

    #[test]
    fn malformed_headers_extract_nothing() {
        assert_eq!(B3.extract(&Headers::new()), None);
        assert_eq!(B3.extract(&carrier(&[("X-B3-TraceId", "xyz"), ("X-B3-SpanId", "a2fb4a1d1a96d312")])), None);
        assert_eq!(
            B3.extract(&carrier(&[
                ("X-B3-TraceId", "463ac35c9f6413ad"),
                ("X-B3-SpanId", "a2fb4a1d1a96d312"),
                ("X-B3-Sampled", "maybe"),
            ])),
            None
        );
    }

    #[test]
    fn inject_then_extract_keeps_ids() {
        let ctx = TraceContext {
            trace_id: "463ac35c9f6413ad".into(),
            span_id: "a2fb4a1d1a96d312".into(),
            parent_id: None,
            sampled: Some(false),
            debug: false,
        };
        let mut headers = Headers::new();
        B3.inject(&ctx, &mut headers);

        assert_eq!(headers.first("x-b3-sampled"), Some("0"));
        assert!(!headers.contains("x-b3-parentspanid"));
        assert_eq!(B3.extract(&headers), Some(ctx));
    }
}

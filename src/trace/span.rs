//! Spans and their exported shape.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use super::propagation::TraceContext;

/// Role of a span in an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    Client,
    Server,
    Producer,
    Consumer,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn service(name: impl Into<String>) -> Self {
        Self { service_name: name.into(), ..Self::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Annotation {
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    pub value: String,
}

/// A finished span in Zipkin v2 JSON shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanData {
    pub trace_id: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<SpanKind>,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Microseconds.
    pub duration: u64,
    pub local_endpoint: Endpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

// ── Per-trace recording ───────────────────────────────────────────────────────

/// Sampling state and finished spans of one trace within one request.
#[derive(Debug)]
pub(crate) struct TraceRecorder {
    pub(crate) trace_id: String,
    sampled: AtomicBool,
    debug: bool,
    finished: Mutex<Vec<SpanData>>,
}

impl TraceRecorder {
    pub(crate) fn new(trace_id: String, sampled: bool, debug: bool) -> Self {
        Self { trace_id, sampled: AtomicBool::new(sampled), debug, finished: Mutex::new(Vec::new()) }
    }

    pub(crate) fn is_sampled(&self) -> bool {
        self.debug || self.sampled.load(Ordering::Acquire)
    }

    /// Takes the finished spans, or nothing when the trace is not sampled.
    pub(crate) fn drain(&self) -> Vec<SpanData> {
        let spans = std::mem::take(&mut *self.finished.lock());
        if self.is_sampled() { spans } else { Vec::new() }
    }
}

#[derive(Debug)]
struct SpanState {
    name: String,
    kind: Option<SpanKind>,
    start: SystemTime,
    tags: BTreeMap<String, String>,
    annotations: Vec<Annotation>,
    remote_endpoint: Option<Endpoint>,
    finished: bool,
}

#[doc(hidden)]
#[derive(Debug)]
pub struct Recording {
    trace_id: String,
    span_id: String,
    parent_id: Option<String>,
    is_root: bool,
    local_endpoint: Arc<Endpoint>,
    max_tag_len: usize,
    trace: Arc<TraceRecorder>,
    state: Mutex<SpanState>,
}

/// Options for a recording span, resolved by the tracer.
pub(crate) struct SpanInit {
    pub(crate) name: String,
    pub(crate) span_id: String,
    pub(crate) parent_id: Option<String>,
    pub(crate) is_root: bool,
    pub(crate) start: SystemTime,
    pub(crate) local_endpoint: Arc<Endpoint>,
    pub(crate) max_tag_len: usize,
    pub(crate) trace: Arc<TraceRecorder>,
}

// ── Span ──────────────────────────────────────────────────────────────────────

/// A traced operation.
///
/// Cloning is cheap and every clone refers to the same span. A no-op span has
/// the same interface and discards everything.
///
/// Lifecycle: started by a tracer, tagged any number of times, finished once.
/// Tags and annotations added after `finish` are discarded and a second
/// `finish` reports nothing.
#[derive(Clone, Debug, Default)]
pub enum Span {
    Recording(Arc<Recording>),
    #[default]
    Noop,
}

impl Span {
    pub(crate) fn start(init: SpanInit) -> Self {
        let SpanInit { name, span_id, parent_id, is_root, start, local_endpoint, max_tag_len, trace } = init;
        Self::Recording(Arc::new(Recording {
            trace_id: trace.trace_id.clone(),
            span_id,
            parent_id,
            is_root,
            local_endpoint,
            max_tag_len,
            trace,
            state: Mutex::new(SpanState {
                name,
                kind: None,
                start,
                tags: BTreeMap::new(),
                annotations: Vec::new(),
                remote_endpoint: None,
                finished: false,
            }),
        }))
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }

    pub fn is_root(&self) -> bool {
        match self {
            Self::Recording(r) => r.is_root,
            Self::Noop => false,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Recording(r) => Some(&r.trace_id),
            Self::Noop => None,
        }
    }

    pub fn span_id(&self) -> Option<&str> {
        match self {
            Self::Recording(r) => Some(&r.span_id),
            Self::Noop => None,
        }
    }

    /// The propagation context, reflecting the current sampling state.
    pub fn context(&self) -> Option<TraceContext> {
        let Self::Recording(r) = self else { return None };
        Some(TraceContext {
            trace_id: r.trace_id.clone(),
            span_id: r.span_id.clone(),
            parent_id: r.parent_id.clone(),
            sampled: Some(r.trace.is_sampled()),
            debug: r.trace.debug,
        })
    }

    pub fn is_sampled(&self) -> bool {
        match self {
            Self::Recording(r) => r.trace.is_sampled(),
            Self::Noop => false,
        }
    }

    /// Marks the whole trace this span belongs to as sampled.
    pub fn force_sample(&self) {
        if let Self::Recording(r) = self {
            r.trace.sampled.store(true, Ordering::Release);
        }
    }

    pub fn set_name(&self, name: &str) {
        self.with_open_state(|s| name.clone_into(&mut s.name));
    }

    pub fn set_kind(&self, kind: SpanKind) {
        self.with_open_state(|s| s.kind = Some(kind));
    }

    pub fn set_remote_endpoint(&self, endpoint: Endpoint) {
        self.with_open_state(|s| s.remote_endpoint = Some(endpoint));
    }

    /// Records a tag.
    ///
    /// Empty keys, empty strings and `null` are ignored. Numbers and booleans
    /// are stringified, arrays and objects JSON-encoded. Values longer than the
    /// tracer's maximum tag length are discarded.
    pub fn tag(&self, key: &str, value: impl Into<Value>) {
        let Self::Recording(r) = self else { return };
        if key.is_empty() {
            return;
        }
        let Some(value) = tag_value(value.into()) else { return };
        if value.len() > r.max_tag_len {
            tracing::debug!(key, len = value.len(), "discarding oversized span tag");
            return;
        }
        self.with_open_state(|s| {
            s.tags.insert(key.to_owned(), value);
        });
    }

    pub fn tags<K, V, I>(&self, tags: I)
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in tags {
            self.tag(key.as_ref(), value);
        }
    }

    /// Tags the span with an `error` message.
    pub fn set_error(&self, err: &dyn std::error::Error) {
        self.tag("error", err.to_string());
    }

    pub fn annotate(&self, value: &str, at: SystemTime) {
        if value.is_empty() {
            return;
        }
        self.with_open_state(|s| s.annotations.push(Annotation { timestamp: micros(at), value: value.to_owned() }));
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::Recording(r) => r.state.lock().finished,
            Self::Noop => true,
        }
    }

    pub fn finish(&self) {
        self.finish_at(SystemTime::now());
    }

    /// Finishes the span at `end`. Only the first call has an effect.
    pub fn finish_at(&self, end: SystemTime) {
        let Self::Recording(r) = self else { return };
        let data = {
            let mut s = r.state.lock();
            if s.finished {
                return;
            }
            s.finished = true;
            let duration = end.duration_since(s.start).unwrap_or_default();
            SpanData {
                trace_id: r.trace_id.clone(),
                id: r.span_id.clone(),
                parent_id: r.parent_id.clone(),
                name: s.name.clone(),
                kind: s.kind,
                timestamp: micros(s.start),
                duration: u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
                local_endpoint: (*r.local_endpoint).clone(),
                remote_endpoint: s.remote_endpoint.take(),
                tags: std::mem::take(&mut s.tags),
                annotations: std::mem::take(&mut s.annotations),
                debug: r.trace.debug,
            }
        };
        r.trace.finished.lock().push(data);
    }

    /// Closes the span without reporting it.
    pub fn abandon(&self) {
        if let Self::Recording(r) = self {
            r.state.lock().finished = true;
        }
    }

    fn with_open_state(&self, f: impl FnOnce(&mut SpanState)) {
        if let Self::Recording(r) = self {
            let mut state = r.state.lock();
            if !state.finished {
                f(&mut state);
            }
        }
    }
}

fn tag_value(value: Value) -> Option<String> {
    let s = match value {
        Value::Null => return None,
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(&other).ok()?,
    };
    (!s.is_empty()).then_some(s)
}

pub(crate) fn micros(at: SystemTime) -> u64 {
    let since = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(since.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn span(max_tag_len: usize) -> (Span, Arc<TraceRecorder>) {
        let trace = Arc::new(TraceRecorder::new("463ac35c9f6413ad".into(), true, false));
        let span = Span::start(SpanInit {
            name: "op".into(),
            span_id: "a2fb4a1d1a96d312".into(),
            parent_id: None,
            is_root: true,
            start: UNIX_EPOCH + Duration::from_secs(10),
            local_endpoint: Arc::new(Endpoint::service("orders")),
            max_tag_len,
            trace: Arc::clone(&trace),
        });
        (span, trace)
    }

    #[test]
    fn tag_values_are_normalised() {
        let (span, trace) = span(1024);
        span.tag("", "x");
        span.tag("empty", "");
        span.tag("null", Value::Null);
        span.tag("code", 1200);
        span.tag("ok", true);
        span.tag("obj", json!({"a": [1, 2]}));
        span.finish_at(UNIX_EPOCH + Duration::from_millis(10_250));

        let data = trace.drain();
        let tags = &data[0].tags;
        assert_eq!(tags.len(), 3);
        assert_eq!(tags["code"], "1200");
        assert_eq!(tags["ok"], "true");
        assert_eq!(tags["obj"], r#"{"a":[1,2]}"#);
        assert_eq!(data[0].duration, 250_000);
        assert_eq!(data[0].timestamp, 10_000_000);
    }

    #[test]
    fn oversized_tags_are_discarded() {
        let (span, trace) = span(4);
        span.tag("short", "abcd");
        span.tag("long", "abcde");
        span.finish();
        let tags = &trace.drain()[0].tags;
        assert!(tags.contains_key("short"));
        assert!(!tags.contains_key("long"));
    }

    #[test]
    fn finish_is_idempotent_and_freezes_tags() {
        let (span, trace) = span(1024);
        span.finish();
        span.tag("late", "x");
        span.finish();
        let data = trace.drain();
        assert_eq!(data.len(), 1);
        assert!(data[0].tags.is_empty());
    }

    #[test]
    fn unsampled_trace_reports_nothing_until_forced() {
        let trace = Arc::new(TraceRecorder::new("463ac35c9f6413ad".into(), false, false));
        trace.finished.lock().push(SpanData {
            trace_id: trace.trace_id.clone(),
            id: "a2fb4a1d1a96d312".into(),
            parent_id: None,
            name: "op".into(),
            kind: None,
            timestamp: 0,
            duration: 0,
            local_endpoint: Endpoint::default(),
            remote_endpoint: None,
            tags: BTreeMap::new(),
            annotations: Vec::new(),
            debug: false,
        });
        assert!(trace.drain().is_empty());
    }

    #[test]
    fn noop_span_discards_everything() {
        let span = Span::Noop;
        span.tag("k", "v");
        span.force_sample();
        span.finish();
        assert!(span.is_noop());
        assert!(!span.is_sampled());
        assert_eq!(span.context(), None);
    }

    #[test]
    fn exported_json_uses_zipkin_field_names() {
        let (span, trace) = span(1024);
        span.set_kind(SpanKind::Server);
        span.finish();
        let json = serde_json::to_value(&trace.drain()[0]).unwrap();
        assert_eq!(json["traceId"], "463ac35c9f6413ad");
        assert_eq!(json["kind"], "SERVER");
        assert_eq!(json["localEndpoint"]["serviceName"], "orders");
        assert!(json.get("parentId").is_none());
        assert!(json.get("debug").is_none());
    }
}

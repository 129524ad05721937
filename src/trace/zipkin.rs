//! The recording tracer.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use super::propagation::{B3, Propagation, TraceContext};
use super::reporter::{LogReporter, Reporter};
use super::sampler::Sampler;
use super::span::{Endpoint, Span, SpanInit, TraceRecorder};
use super::Tracer;

/// Settings shared by every tracer a [`TracerProvider`](super::TracerProvider) hands out.
pub struct ZipkinSettings {
    local_endpoint: Arc<Endpoint>,
    trace_id_128bit: bool,
    max_tag_len: usize,
    sampler: Sampler,
    reporter: Arc<dyn Reporter>,
}

impl ZipkinSettings {
    /// Always-sampling, log-reporting settings for `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            local_endpoint: Arc::new(Endpoint::service(service_name)),
            trace_id_128bit: false,
            max_tag_len: 1_048_576,
            sampler: Sampler::Always,
            reporter: Arc::new(LogReporter::new()),
        }
    }

    #[must_use]
    pub fn trace_id_128bit(mut self, enabled: bool) -> Self {
        self.trace_id_128bit = enabled;
        self
    }

    #[must_use]
    pub fn max_tag_len(mut self, len: usize) -> Self {
        self.max_tag_len = len;
        self
    }

    #[must_use]
    pub fn sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    #[must_use]
    pub fn reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }
}

impl fmt::Debug for ZipkinSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipkinSettings")
            .field("service_name", &self.local_endpoint.service_name)
            .field("trace_id_128bit", &self.trace_id_128bit)
            .field("max_tag_len", &self.max_tag_len)
            .field("sampler", &self.sampler)
            .finish_non_exhaustive()
    }
}

/// Records spans for one request and reports sampled traces on flush.
///
/// The first span started becomes the root. Later spans without an explicit
/// parent are children of the root.
#[derive(Debug)]
pub struct ZipkinTracer {
    settings: Arc<ZipkinSettings>,
    root: Option<Span>,
    current: Option<Span>,
    traces: Vec<Arc<TraceRecorder>>,
}

impl ZipkinTracer {
    pub fn new(settings: Arc<ZipkinSettings>) -> Self {
        Self { settings, root: None, current: None, traces: Vec::new() }
    }

    fn recorder_for(&mut self, parent: Option<&TraceContext>) -> Arc<TraceRecorder> {
        if let Some(parent) = parent {
            if let Some(existing) = self.traces.iter().find(|t| t.trace_id == parent.trace_id) {
                return Arc::clone(existing);
            }
        }
        let (trace_id, sampled, debug) = match parent {
            Some(p) => (
                p.trace_id.clone(),
                p.sampled.unwrap_or_else(|| self.settings.sampler.is_sampled()),
                p.debug,
            ),
            None => (self.new_trace_id(), self.settings.sampler.is_sampled(), false),
        };
        let recorder = Arc::new(TraceRecorder::new(trace_id, sampled, debug));
        self.traces.push(Arc::clone(&recorder));
        recorder
    }

    fn new_trace_id(&self) -> String {
        if self.settings.trace_id_128bit {
            format!("{:032x}", rand::random::<u128>())
        } else {
            format!("{:016x}", rand::random::<u64>())
        }
    }
}

impl Tracer for ZipkinTracer {
    fn start_span(&mut self, name: &str, parent: Option<&TraceContext>, start: SystemTime) -> Span {
        let parent = parent.cloned().or_else(|| self.root.as_ref().and_then(Span::context));
        let trace = self.recorder_for(parent.as_ref());
        let span = Span::start(SpanInit {
            name: name.to_owned(),
            span_id: format!("{:016x}", rand::random::<u64>()),
            parent_id: parent.map(|p| p.span_id),
            is_root: self.root.is_none(),
            start,
            local_endpoint: Arc::clone(&self.settings.local_endpoint),
            max_tag_len: self.settings.max_tag_len,
            trace,
        });
        if self.root.is_none() {
            self.root = Some(span.clone());
        }
        self.current = Some(span.clone());
        span
    }

    fn root_span(&self) -> Option<&Span> {
        self.root.as_ref()
    }

    fn current_span(&self) -> Option<&Span> {
        self.current.as_ref()
    }

    fn propagation(&self) -> &dyn Propagation {
        &B3
    }

    fn is_noop(&self) -> bool {
        false
    }

    fn flush(&mut self) {
        let root = self.root.take();
        self.current = None;
        if let Some(root) = &root {
            root.finish();
        }
        let root_ids = root.as_ref().and_then(|r| Some((r.trace_id()?.to_owned(), r.span_id()?.to_owned())));

        for trace in std::mem::take(&mut self.traces) {
            let mut spans = trace.drain();
            if spans.is_empty() {
                continue;
            }
            if let Some((trace_id, span_id)) = &root_ids {
                if let Some(data) = spans.iter_mut().find(|s| &s.trace_id == trace_id && &s.id == span_id) {
                    data.tags.extend(resource_tags());
                }
            }
            tracing::debug!(trace_id = %trace.trace_id, count = spans.len(), "flushing trace");
            self.settings.reporter.report(spans);
        }
    }
}

/// Host and process attributes attached to the root span on flush.
fn resource_tags() -> Vec<(String, String)> {
    let tags = [
        ("host.name", std::env::var("HOSTNAME").unwrap_or_default()),
        ("host.arch", std::env::consts::ARCH.to_owned()),
        ("os.name", std::env::consts::OS.to_owned()),
        ("os.type", std::env::consts::FAMILY.to_owned()),
        ("process.pid", std::process::id().to_string()),
        (
            "process.executable.path",
            std::env::current_exe().map(|p| p.display().to_string()).unwrap_or_default(),
        ),
        ("process.runtime.name", "rust".to_owned()),
        ("process.command", std::env::args().next().unwrap_or_default()),
    ];
    tags.into_iter().filter(|(_, v)| !v.is_empty()).map(|(k, v)| (k.to_owned(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::reporter::MemoryReporter;
    use crate::trace::span::SpanKind;

    fn tracer(sampler: Sampler) -> (ZipkinTracer, MemoryReporter) {
        let reporter = MemoryReporter::new();
        let settings = ZipkinSettings::new("orders").sampler(sampler).reporter(reporter.clone());
        (ZipkinTracer::new(Arc::new(settings)), reporter)
    }

    #[test]
    fn first_span_is_root_and_later_spans_are_its_children() {
        let (mut tracer, reporter) = tracer(Sampler::Always);
        let root = tracer.start_span("HTTP Server GET: /", None, SystemTime::now());
        let child = tracer.start_span("HTTP Client GET: /stock", None, SystemTime::now());

        assert!(root.is_root());
        assert!(!child.is_root());
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.context().unwrap().parent_id.as_deref(), root.span_id());
        assert_eq!(tracer.current_span().and_then(Span::span_id), child.span_id());

        child.finish();
        tracer.flush();
        assert!(tracer.root_span().is_none());
        assert!(tracer.current_span().is_none());

        let spans = reporter.spans();
        assert_eq!(spans.len(), 2);
        let root_data = spans.iter().find(|s| s.parent_id.is_none()).unwrap();
        assert_eq!(root_data.tags["process.runtime.name"], "rust");
        assert!(root_data.tags.contains_key("process.pid"));
        assert!(!root_data.tags.contains_key("process.runtime.version"));
    }

    #[test]
    fn extracted_parent_sets_trace_and_sampling() {
        let (mut tracer, reporter) = tracer(Sampler::Always);
        let upstream = TraceContext {
            trace_id: "463ac35c9f6413ad".into(),
            span_id: "a2fb4a1d1a96d312".into(),
            parent_id: None,
            sampled: Some(false),
            debug: false,
        };
        let span = tracer.start_span("server", Some(&upstream), SystemTime::now());
        span.set_kind(SpanKind::Server);

        assert_eq!(span.trace_id(), Some("463ac35c9f6413ad"));
        assert!(!span.is_sampled());
        tracer.flush();
        assert!(reporter.spans().is_empty());
    }

    #[test]
    fn forcing_any_span_samples_the_whole_trace() {
        let (mut tracer, reporter) = tracer(Sampler::Never);
        let root = tracer.start_span("server", None, SystemTime::now());
        let child = tracer.start_span("client", None, SystemTime::now());
        child.force_sample();
        child.finish();

        assert!(root.is_sampled());
        tracer.flush();
        assert_eq!(reporter.spans().len(), 2);
    }

    #[test]
    fn flush_resets_for_the_next_request() {
        let (mut tracer, reporter) = tracer(Sampler::Always);
        let first = tracer.start_span("a", None, SystemTime::now());
        tracer.flush();
        let second = tracer.start_span("b", None, SystemTime::now());

        assert!(second.is_root());
        assert_ne!(first.trace_id(), second.trace_id());
        tracer.flush();
        tracer.flush();
        assert_eq!(reporter.spans().len(), 2);
    }

    #[test]
    fn percentage_sampling_starts_spans() {
        let (mut tracer, reporter) = tracer(Sampler::percentage(1.0).unwrap());
        tracer.start_span("GET /", None, SystemTime::now());
        tracer.flush();
        assert_eq!(reporter.spans().len(), 1);
    }

    #[test]
    fn wide_trace_ids_on_request() {
        let settings = ZipkinSettings::new("orders").trace_id_128bit(true).reporter(MemoryReporter::new());
        let mut tracer = ZipkinTracer::new(Arc::new(settings));
        let span = tracer.start_span("a", None, SystemTime::now());
        assert_eq!(span.trace_id().map(str::len), Some(32));
    }
}

//! Destinations for finished spans.

use std::sync::Arc;

use parking_lot::Mutex;

use super::span::SpanData;

/// Receives the finished spans of a sampled trace when a tracer flushes.
pub trait Reporter: Send + Sync {
    fn report(&self, spans: Vec<SpanData>);
}

/// Writes each batch as one JSON line through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogReporter {
    endpoint: Option<String>,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the collector the batch was meant for in every line.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl Reporter for LogReporter {
    fn report(&self, spans: Vec<SpanData>) {
        if spans.is_empty() {
            return;
        }
        match serde_json::to_string(&spans) {
            Ok(json) => tracing::info!(
                target: "observa::zipkin",
                endpoint = self.endpoint.as_deref().unwrap_or_default(),
                count = spans.len(),
                spans = %json,
                "reporting spans"
            ),
            Err(e) => tracing::warn!(target: "observa::zipkin", "failed to encode spans: {e}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _spans: Vec<SpanData>) {}
}

/// Keeps reported spans in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryReporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().clone()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, spans: Vec<SpanData>) {
        self.spans.lock().extend(spans);
    }
}

//! Tracer and span abstraction.
//!
//! A [`TracerProvider`] is built once from configuration and shared. Each
//! request gets its own [`Tracer`] from it, held in the request's
//! [`Scope`](crate::Scope), so root and current span state never leak between
//! concurrent requests.
//!
//! ```rust
//! use std::time::SystemTime;
//! use observa::trace::{MemoryReporter, Sampler, TracerProvider, ZipkinSettings};
//!
//! let reporter = MemoryReporter::new();
//! let provider = TracerProvider::zipkin(
//!     ZipkinSettings::new("orders").sampler(Sampler::Never).reporter(reporter.clone()),
//! );
//!
//! let mut tracer = provider.tracer();
//! let root = tracer.start_span("HTTP Server GET: /orders", None, SystemTime::now());
//! root.tag("biz_code", 1200);
//! root.force_sample();
//! tracer.flush();
//!
//! assert_eq!(reporter.spans().len(), 1);
//! ```

mod noop;
mod propagation;
mod reporter;
mod sampler;
mod span;
mod zipkin;

use std::sync::Arc;
use std::time::SystemTime;

use crate::config::ObservabilityConfig;
use crate::error::{Error, Result};

pub use noop::NoopTracer;
pub use propagation::{
    B3, FLAGS_HEADER, PARENT_SPAN_ID_HEADER, Propagation, SAMPLED_HEADER, SPAN_ID_HEADER, TRACE_ID_HEADER,
    TraceContext,
};
pub use reporter::{LogReporter, MemoryReporter, NoopReporter, Reporter};
pub use sampler::{Rate, Sampler};
pub use span::{Annotation, Endpoint, Span, SpanData, SpanKind};
pub use zipkin::{ZipkinSettings, ZipkinTracer};

/// Request-scoped span factory.
pub trait Tracer: Send {
    /// Starts a span.
    ///
    /// With no `parent` the span is a child of the root span, or becomes the
    /// root when none exists yet.
    fn start_span(&mut self, name: &str, parent: Option<&TraceContext>, start: SystemTime) -> Span;

    fn root_span(&self) -> Option<&Span>;

    /// The most recently started span.
    fn current_span(&self) -> Option<&Span>;

    fn propagation(&self) -> &dyn Propagation;

    fn is_noop(&self) -> bool;

    /// Finishes the root span, reports sampled traces and forgets all spans.
    ///
    /// Call exactly once at the end of a request.
    fn flush(&mut self);
}

/// Hands out one tracer per request.
#[derive(Clone, Debug, Default)]
pub enum TracerProvider {
    Zipkin(Arc<ZipkinSettings>),
    #[default]
    Noop,
}

impl TracerProvider {
    pub fn zipkin(settings: ZipkinSettings) -> Self {
        Self::Zipkin(Arc::new(settings))
    }

    /// Selects the driver, sampler and reporter named in `config`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidDriver`, `Error::InvalidSampler` or
    /// `Error::InvalidReporter` for names that do not exist.
    pub fn from_config(config: &ObservabilityConfig) -> Result<Self> {
        let zipkin = &config.tracing.zipkin;
        match config.tracing.driver.to_ascii_lowercase().as_str() {
            "zipkin" => {
                let sampler = Sampler::from_kind(&zipkin.sampler.kind, zipkin.sampler.rate)?;
                let settings = ZipkinSettings::new(config.service.app_name.clone())
                    .trace_id_128bit(zipkin.trace_id_128bit)
                    .max_tag_len(zipkin.max_tag_len)
                    .sampler(sampler);
                let settings = match zipkin.reporter.to_ascii_lowercase().as_str() {
                    "log" => settings.reporter(LogReporter::new().with_endpoint(zipkin.endpoint.clone())),
                    "noop" => settings.reporter(NoopReporter),
                    "memory" => settings.reporter(MemoryReporter::new()),
                    other => return Err(Error::InvalidReporter(other.to_owned())),
                };
                Ok(Self::zipkin(settings))
            }
            "null" | "noop" => Ok(Self::Noop),
            other => Err(Error::InvalidDriver(other.to_owned())),
        }
    }

    pub fn tracer(&self) -> Box<dyn Tracer> {
        match self {
            Self::Zipkin(settings) => Box::new(ZipkinTracer::new(Arc::clone(settings))),
            Self::Noop => Box::new(NoopTracer::new()),
        }
    }
}

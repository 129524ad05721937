//! Structured log records and the sinks they end up in.
//!
//! A [`Logger`] builds a raw [`LogRecord`], runs it through a
//! [`LogPipeline`], and hands the flat result to a [`LogSink`].
//!
//! ```rust
//! use observa::log::{Correlation, Logger, MemorySink};
//! use serde_json::{Map, json};
//!
//! let sink = MemorySink::new();
//! let logger = Logger::new(Default::default(), sink.clone());
//!
//! let ids = Correlation { trace_id: "463ac35c9f6413ad", request_id: "r-1" };
//! logger.info("order placed", Map::new(), &ids);
//!
//! let line = &sink.records()[0];
//! assert_eq!(line["msg"], json!("order placed"));
//! assert_eq!(line["level"], json!("info"));
//! assert_eq!(line["trace_id"], json!("463ac35c9f6413ad"));
//! ```

mod processor;
mod record;

use std::panic::Location;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

pub use processor::{
    ErrorStack, FieldCleanup, GLOBAL_FIELDS, GlobalFields, LogLevel, LogPipeline, LogProcessor, ServiceFields,
    TS_FORMAT, Timestamp, TraceAndRequestId,
};
pub use record::{LogRecord, MAX_DEPTH};

/// Severity, with Monolog-compatible numeric codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn code(self) -> u64 {
        match self {
            Self::Debug => 100,
            Self::Info => 200,
            Self::Warning => 300,
            Self::Error => 400,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            100 => Some(Self::Debug),
            200 => Some(Self::Info),
            300 => Some(Self::Warning),
            400 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Identifiers of the request a log line belongs to. Empty means unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Correlation<'a> {
    pub trace_id: &'a str,
    pub request_id: &'a str,
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

/// Receives fully transformed, flat records.
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, record: Map<String, Value>);
}

/// Emits every record as one JSON line through `tracing`, target `observa::access`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: Level, record: Map<String, Value>) {
        let line = Value::Object(record).to_string();
        match level {
            Level::Debug => tracing::debug!(target: "observa::access", "{line}"),
            Level::Info => tracing::info!(target: "observa::access", "{line}"),
            Level::Warning => tracing::warn!(target: "observa::access", "{line}"),
            Level::Error => tracing::error!(target: "observa::access", "{line}"),
        }
    }
}

/// Collects records in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.records.lock().clone()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, _level: Level, record: Map<String, Value>) {
        self.records.lock().push(record);
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

/// Cheap to clone; clones share the pipeline and sink.
#[derive(Clone)]
pub struct Logger {
    pipeline: Arc<LogPipeline>,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(pipeline: LogPipeline, sink: impl LogSink + 'static) -> Self {
        Self { pipeline: Arc::new(pipeline), sink: Arc::new(sink) }
    }

    /// Standard pipeline writing through [`TracingSink`].
    pub fn tracing(pipeline: LogPipeline) -> Self {
        Self::new(pipeline, TracingSink)
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: &str, context: Map<String, Value>, correlation: &Correlation<'_>) {
        let record = LogRecord::new(level, message, context)
            .with_timestamp(chrono::Local::now().fixed_offset())
            .with_caller(Location::caller());
        let record = self.pipeline.process(record, correlation);
        self.sink.emit(level, record.into_fields());
    }

    #[track_caller]
    pub fn debug(&self, message: &str, context: Map<String, Value>, correlation: &Correlation<'_>) {
        self.log(Level::Debug, message, context, correlation);
    }

    #[track_caller]
    pub fn info(&self, message: &str, context: Map<String, Value>, correlation: &Correlation<'_>) {
        self.log(Level::Info, message, context, correlation);
    }

    #[track_caller]
    pub fn warning(&self, message: &str, context: Map<String, Value>, correlation: &Correlation<'_>) {
        self.log(Level::Warning, message, context, correlation);
    }

    #[track_caller]
    pub fn error(&self, message: &str, context: Map<String, Value>, correlation: &Correlation<'_>) {
        self.log(Level::Error, message, context, correlation);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing(LogPipeline::default())
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").field("pipeline", &self.pipeline).finish_non_exhaustive()
    }
}

//! The log record transformation pipeline.
//!
//! Each processor takes a record and returns it transformed. None keeps state
//! between calls. [`LogPipeline::new`] installs them in this order:
//!
//! 1. [`TraceAndRequestId`]
//! 2. [`ErrorStack`]
//! 3. [`Timestamp`]
//! 4. [`GlobalFields`]
//! 5. [`LogLevel`]
//! 6. [`ServiceFields`]
//! 7. [`FieldCleanup`]

use chrono::DateTime;
use serde_json::Value;

use super::record::LogRecord;
use super::{Correlation, Level};
use crate::service::ServiceInfo;

/// Context key whose members are hoisted to the top level.
pub const GLOBAL_FIELDS: &str = "global_fields";

/// Canonical `ts` format, e.g. `2024-05-01T10:00:00.123+0800`.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

pub trait LogProcessor: Send + Sync {
    fn process(&self, record: LogRecord, correlation: &Correlation<'_>) -> LogRecord;
}

/// Adds `trace_id` and `request_id` when they are known.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceAndRequestId;

impl LogProcessor for TraceAndRequestId {
    fn process(&self, mut record: LogRecord, correlation: &Correlation<'_>) -> LogRecord {
        if !correlation.request_id.is_empty() {
            record.set("request_id", correlation.request_id);
        }
        if !correlation.trace_id.is_empty() {
            record.set("trace_id", correlation.trace_id);
        }
        record
    }
}

/// Adds the caller's `file` and `line` to error records.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorStack;

impl LogProcessor for ErrorStack {
    fn process(&self, mut record: LogRecord, _: &Correlation<'_>) -> LogRecord {
        if record.level() != Some(Level::Error) {
            return record;
        }
        match record.caller() {
            Some(caller) => {
                record.set("file", caller.file());
                record.set("line", caller.line());
            }
            None => {
                record.set("file", "N/A");
                record.set("line", "N/A");
            }
        }
        record
    }
}

/// Writes `ts` from the record's timestamp and drops the raw forms.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timestamp;

impl LogProcessor for Timestamp {
    fn process(&self, mut record: LogRecord, _: &Correlation<'_>) -> LogRecord {
        let raw = record.delete("datetime");
        let at = record.take_timestamp().or_else(|| {
            raw.as_ref().and_then(Value::as_str).and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        });
        if let Some(at) = at {
            record.set("ts", at.format(TS_FORMAT).to_string());
        }
        record
    }
}

/// Moves `context.global_fields.*` to the top level.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalFields;

impl LogProcessor for GlobalFields {
    fn process(&self, mut record: LogRecord, _: &Correlation<'_>) -> LogRecord {
        let path = format!("context.{GLOBAL_FIELDS}");
        if let Some(Value::Object(fields)) = record.delete(&path) {
            for (key, value) in fields {
                record.insert_flat(key, value);
            }
        }
        record
    }
}

/// Replaces the numeric level with the lower-cased level name.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogLevel;

impl LogProcessor for LogLevel {
    fn process(&self, mut record: LogRecord, _: &Correlation<'_>) -> LogRecord {
        if !record.has("level") {
            return record;
        }
        let name = record.get("level_name").and_then(Value::as_str).map(str::to_lowercase);
        if let Some(name) = name {
            record.set("level", name);
            record.delete("level_name");
        }
        record
    }
}

/// Stamps static service identity.
#[derive(Clone, Debug, Default)]
pub struct ServiceFields {
    info: ServiceInfo,
}

impl ServiceFields {
    pub fn new(info: ServiceInfo) -> Self {
        Self { info }
    }
}

impl LogProcessor for ServiceFields {
    fn process(&self, mut record: LogRecord, _: &Correlation<'_>) -> LogRecord {
        record.set("app_id", self.info.app_id);
        record.set("app_name", self.info.app_name.as_str());
        record.set("app_version", self.info.app_version.as_str());
        record.set("deploy_env", self.info.deploy_env.as_str());
        record
    }
}

/// Renames `message` to `msg` and drops empty auxiliary containers.
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldCleanup;

impl LogProcessor for FieldCleanup {
    fn process(&self, mut record: LogRecord, _: &Correlation<'_>) -> LogRecord {
        if let Some(message) = record.delete("message") {
            record.set("msg", message);
        }
        for key in ["extra", "context"] {
            if record.get(key).is_some_and(is_empty) {
                record.delete(key);
            }
        }
        record.delete("channel");
        record
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Runs processors in order.
pub struct LogPipeline {
    processors: Vec<Box<dyn LogProcessor>>,
}

impl LogPipeline {
    /// The standard seven stages.
    pub fn new(service: ServiceInfo) -> Self {
        Self::with_processors(vec![
            Box::new(TraceAndRequestId),
            Box::new(ErrorStack),
            Box::new(Timestamp),
            Box::new(GlobalFields),
            Box::new(LogLevel),
            Box::new(ServiceFields::new(service)),
            Box::new(FieldCleanup),
        ])
    }

    pub fn with_processors(processors: Vec<Box<dyn LogProcessor>>) -> Self {
        Self { processors }
    }

    pub fn process(&self, record: LogRecord, correlation: &Correlation<'_>) -> LogRecord {
        self.processors.iter().fold(record, |record, p| p.process(record, correlation))
    }
}

impl Default for LogPipeline {
    fn default() -> Self {
        Self::new(ServiceInfo::default())
    }
}

impl std::fmt::Debug for LogPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPipeline").field("processors", &self.processors.len()).finish()
    }
}

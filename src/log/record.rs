use std::panic::Location;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

use super::Level;

/// Deepest dotted path a record accepts.
pub const MAX_DEPTH: usize = 16;

/// A tree-shaped bag of log fields.
///
/// Paths are dotted (`user.profile.name`) and address nested objects. Paths
/// deeper than [`MAX_DEPTH`] segments are refused.
///
/// ```rust
/// use observa::log::LogRecord;
///
/// let mut record = LogRecord::default();
/// record.set("user.profile.name", "ann");
/// assert_eq!(record.get("user.profile.name"), Some(&"ann".into()));
///
/// record.delete("user.profile.name");
/// assert!(!record.has("user"));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogRecord {
    fields: Map<String, Value>,
    timestamp: Option<DateTime<FixedOffset>>,
    caller: Option<&'static Location<'static>>,
}

impl LogRecord {
    /// A fresh record in the raw shape the processors expect:
    /// `level`, `level_name`, `message`, `context`, `extra`, `channel`.
    pub fn new(level: Level, message: &str, context: Map<String, Value>) -> Self {
        let mut fields = Map::new();
        fields.insert("message".to_owned(), Value::from(message));
        fields.insert("context".to_owned(), Value::Object(context));
        fields.insert("level".to_owned(), Value::from(level.code()));
        fields.insert("level_name".to_owned(), Value::from(level.name()));
        fields.insert("channel".to_owned(), Value::from("observa"));
        fields.insert("extra".to_owned(), Value::Object(Map::new()));
        Self { fields, timestamp: None, caller: None }
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields, ..Self::default() }
    }

    #[must_use]
    pub fn with_timestamp(mut self, at: DateTime<FixedOffset>) -> Self {
        self.timestamp = Some(at);
        self
    }

    #[must_use]
    pub fn with_caller(mut self, caller: &'static Location<'static>) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
    }

    pub fn take_timestamp(&mut self) -> Option<DateTime<FixedOffset>> {
        self.timestamp.take()
    }

    pub fn caller(&self) -> Option<&'static Location<'static>> {
        self.caller
    }

    /// Numeric level, while the record still carries one.
    pub fn level(&self) -> Option<Level> {
        self.fields.get("level").and_then(Value::as_u64).and_then(Level::from_code)
    }

    /// Sets `path`, creating intermediate objects. Returns `false` when the
    /// path is empty or too deep.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> bool {
        let Some(segments) = split(path) else { return false };
        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return false,
        };
        let mut map = &mut self.fields;
        for segment in parents {
            let entry = map.entry((*segment).to_owned()).or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            map = match entry {
                Value::Object(inner) => inner,
                _ => return false,
            };
        }
        map.insert((*last).to_owned(), value.into());
        true
    }

    /// Sets a top-level field named `key` as-is, dots included.
    pub fn insert_flat(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments = split(path)?;
        let (last, parents) = segments.split_last()?;
        let mut map = &self.fields;
        for segment in parents {
            map = map.get(*segment)?.as_object()?;
        }
        map.get(*last)
    }

    /// `true` when `path` holds something other than `null`.
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    /// Removes `path` and prunes ancestors left empty.
    pub fn delete(&mut self, path: &str) -> Option<Value> {
        let segments = split(path)?;
        remove_path(&mut self.fields, &segments)
    }

    pub fn all(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.timestamp = None;
        self.caller = None;
    }
}

fn split(path: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.len() > MAX_DEPTH || segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

fn remove_path(map: &mut Map<String, Value>, segments: &[&str]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return map.remove(*first);
    }
    let child = map.get_mut(*first)?.as_object_mut()?;
    let removed = remove_path(child, rest)?;
    if child.is_empty() {
        map.remove(*first);
    }
    Some(removed)
}

//! Request-scoped key → multi-value store used for cross-process propagation.
//!
//! One [`Metadata`] lives inside each [`Scope`](crate::Scope) and is cleared
//! when the request finishes. Keys are case-insensitive and stored
//! lower-cased. Keys under a propagation prefix (by default
//! [`GLOBAL_PREFIX`]) travel to downstream calls; everything else stays local.

/// Prefix of metadata keys forwarded to downstream calls.
pub const GLOBAL_PREFIX: &str = "x-md-global-";

/// Prefix of metadata keys that describe the immediate caller only.
pub const LOCAL_PREFIX: &str = "x-md-local-";

/// Header naming the calling service.
pub const CALLER_SERVICE: &str = "x-md-local-caller_service";

/// Ordered key → values map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, Vec<String>)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value. Empty keys or values are ignored.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return;
        }
        let key = key.to_ascii_lowercase();
        match self.position(&key) {
            Some(i) => self.entries[i].1.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Replaces all values with `value`. Empty keys or values are ignored.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return;
        }
        let key = key.to_ascii_lowercase();
        match self.position(&key) {
            Some(i) => self.entries[i].1 = vec![value],
            None => self.entries.push((key, vec![value])),
        }
    }

    /// First value of `key`, or `""`.
    pub fn get(&self, key: &str) -> &str {
        self.values(key).first().map_or("", String::as_str)
    }

    /// Every value of `key`; empty when absent.
    pub fn values(&self, key: &str) -> &[String] {
        self.position(key).map_or(&[], |i| self.entries[i].1.as_slice())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Returns a new combined store. Local keys keep their position and
    /// values; foreign values are appended after them.
    #[must_use]
    pub fn merge<'a, I, V>(&self, other: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let mut merged = self.clone();
        for (key, values) in other {
            for value in values {
                merged.add(key, value);
            }
        }
        merged
    }

    /// Visits entries in insertion order until `f` returns `false`.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &[String]) -> bool,
    {
        for (key, values) in &self.entries {
            if !f(key, values) {
                break;
            }
        }
    }

    /// Entries whose key starts with any of `prefixes` (ASCII case-insensitive).
    pub fn with_prefixes<'a>(
        &'a self,
        prefixes: &'a [String],
    ) -> impl Iterator<Item = (&'a str, &'a [String])> + 'a {
        self.iter().filter(move |(key, _)| has_prefix(key, prefixes))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))
    }
}

/// Literal, ASCII case-insensitive prefix test.
pub fn has_prefix(key: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        key.len() >= prefix.len()
            && key.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    })
}

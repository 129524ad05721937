//! State shared by [`Request`](crate::Request) and [`Response`](crate::Response).
//!
//! Both carry a protocol version, a header multimap and a raw body. The
//! [`Message`] trait gives them one set of accessors over a common
//! [`Parts`] value, so filters can treat either side of an exchange the same
//! way.

use std::borrow::Cow;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

// ── Headers ───────────────────────────────────────────────────────────────────

/// Ordered, case-insensitive header multimap.
///
/// - Lookup ignores ASCII case; the spelling of the first registration is kept.
/// - Setting an existing name appends instead of overwriting, and a value
///   already present under that name is not stored twice.
/// - Iteration follows registration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` under `name`, skipping exact duplicates.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(i) => {
                let values = &mut self.entries[i].1;
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            None => self.entries.push((name.to_owned(), vec![value])),
        }
    }

    /// Replaces every value of `name` with `value`, keeping its position.
    pub fn replace(&mut self, name: &str, value: impl Into<String>) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = vec![value.into()],
            None => self.entries.push((name.to_owned(), vec![value.into()])),
        }
    }

    /// Replaces every value of `name` and moves it to the front.
    pub fn prepend(&mut self, name: &str, value: impl Into<String>) {
        let name = match self.position(name) {
            Some(i) => self.entries.remove(i).0,
            None => name.to_owned(),
        };
        self.entries.insert(0, (name, vec![value.into()]));
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let i = self.position(name)?;
        Some(self.entries.remove(i).1)
    }

    /// All values registered under `name`; empty when absent.
    pub fn get(&self, name: &str) -> &[String] {
        self.position(name).map_or(&[], |i| self.entries[i].1.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).first().map(String::as_str)
    }

    /// Values of `name` joined with `", "`.
    pub fn line(&self, name: &str) -> String {
        self.get(name).join(", ")
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// `(name, values)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        headers.extend(iter);
        headers
    }
}

impl<K: AsRef<str>, V: Into<String>> Extend<(K, V)> for Headers {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.append(name.as_ref(), value);
        }
    }
}

// ── Parts ─────────────────────────────────────────────────────────────────────

/// Protocol version, headers and body of one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parts {
    pub(crate) version: String,
    pub(crate) headers: Headers,
    pub(crate) body: Bytes,
}

impl Default for Parts {
    fn default() -> Self {
        Self { version: "1.1".to_owned(), headers: Headers::new(), body: Bytes::new() }
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// Accessors common to requests and responses.
pub trait Message {
    #[doc(hidden)]
    fn parts(&self) -> &Parts;
    #[doc(hidden)]
    fn parts_mut(&mut self) -> &mut Parts;

    fn protocol_version(&self) -> &str {
        &self.parts().version
    }

    fn set_protocol_version(&mut self, version: &str) {
        version.clone_into(&mut self.parts_mut().version);
    }

    fn headers(&self) -> &Headers {
        &self.parts().headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.parts_mut().headers
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers().contains(name)
    }

    fn header(&self, name: &str) -> &[String] {
        self.headers().get(name)
    }

    fn header_line(&self, name: &str) -> String {
        self.headers().line(name)
    }

    fn set_header(&mut self, name: &str, value: impl Into<String>)
    where
        Self: Sized,
    {
        self.headers_mut().append(name, value);
    }

    fn set_headers<K, V, I>(&mut self, headers: I)
    where
        Self: Sized,
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.headers_mut().extend(headers);
    }

    /// Registers `name: value` lines. Lines without a colon are ignored.
    fn set_raw_headers<'a, I>(&mut self, lines: I)
    where
        Self: Sized,
        I: IntoIterator<Item = &'a str>,
    {
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                self.headers_mut().append(name.trim(), value.trim());
            }
        }
    }

    /// Renders the headers as `name:value` lines.
    fn raw_headers(&self) -> Vec<String> {
        self.headers()
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| format!("{name}:{v}")))
            .collect()
    }

    fn body(&self) -> &[u8] {
        &self.parts().body
    }

    /// The body as text, replacing invalid UTF-8.
    fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.parts().body)
    }

    fn body_size(&self) -> usize {
        self.parts().body.len()
    }

    fn set_body(&mut self, body: impl Into<Bytes>)
    where
        Self: Sized,
    {
        self.parts_mut().body = body.into();
    }

    /// Serialises `value` as the JSON body.
    fn set_json_body<T: Serialize>(&mut self, value: &T) -> serde_json::Result<()>
    where
        Self: Sized,
    {
        self.parts_mut().body = Bytes::from(serde_json::to_vec(value)?);
        Ok(())
    }

    /// The body parsed as JSON, or `None` when it is empty or not JSON.
    fn data(&self) -> Option<Value> {
        let body = &self.parts().body;
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice(body).ok()
    }
}

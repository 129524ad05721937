//! Header allow-listing and sensitive value redaction.

use serde_json::{Map, Value};

use crate::message::Headers;

/// Replacement for every sensitive value.
pub const REDACTED: &str = "This value is hidden because it contains sensitive info";

/// Restricts headers to an allow-list and masks sensitive values.
///
/// Names are compared ASCII case-insensitively. Sensitive keys are never
/// removed; only their values are replaced by [`REDACTED`].
///
/// ```rust
/// use observa::{HeaderFilter, Headers, REDACTED};
///
/// let filter = HeaderFilter::new(["*"], ["authorization"], ["password"]);
/// let headers: Headers = [("Authorization", "Bearer t0ken"), ("Accept", "*/*")]
///     .into_iter()
///     .collect();
///
/// let filtered = filter.filter_headers(&headers);
/// assert_eq!(filtered.get("authorization"), [REDACTED]);
/// assert_eq!(filtered.get("accept"), ["*/*"]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderFilter {
    allowed_headers: Vec<String>,
    sensitive_headers: Vec<String>,
    sensitive_input: Vec<String>,
}

impl HeaderFilter {
    pub fn new<A, S, I>(allowed_headers: A, sensitive_headers: S, sensitive_input: I) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self {
            allowed_headers: lowercase_all(allowed_headers),
            sensitive_headers: lowercase_all(sensitive_headers),
            sensitive_input: lowercase_all(sensitive_input),
        }
    }

    /// Allow-list first, then redaction. Applying it twice changes nothing.
    pub fn filter_headers(&self, headers: &Headers) -> Headers {
        let allow_all = self.allowed_headers.iter().any(|h| h == "*");
        let mut filtered = Headers::new();
        for (name, values) in headers.iter() {
            if !allow_all && !contains_ignore_case(&self.allowed_headers, name) {
                continue;
            }
            if contains_ignore_case(&self.sensitive_headers, name) {
                filtered.replace(name, REDACTED);
            } else {
                for value in values {
                    filtered.append(name, value.as_str());
                }
            }
        }
        filtered
    }

    /// Masks sensitive top-level fields, whatever their value type.
    pub fn filter_input(&self, input: &Map<String, Value>) -> Map<String, Value> {
        input
            .iter()
            .map(|(name, value)| {
                let value = if contains_ignore_case(&self.sensitive_input, name) {
                    Value::String(REDACTED.to_owned())
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Renders headers as a sorted, column-aligned block.
    ///
    /// Names are sorted ascending (case-insensitively) and title-cased per
    /// `-` segment; every value gets its own `Name: value\r\n` line.
    pub fn transformed_headers(&self, headers: &Headers) -> String {
        let mut entries: Vec<_> = headers.iter().collect();
        if entries.is_empty() {
            return String::new();
        }
        entries.sort_by_key(|(name, _)| name.to_ascii_lowercase());
        let width = entries.iter().map(|(name, _)| name.len()).max().unwrap_or(0) + 1;

        let mut content = String::new();
        for (name, values) in entries {
            let label = format!("{}:", title_case(name));
            for value in values {
                content.push_str(&format!("{label:<width$} {value}\r\n"));
            }
        }
        content
    }
}

impl Default for HeaderFilter {
    fn default() -> Self {
        Self::new(["*"], Vec::<String>::new(), ["password"])
    }
}

fn lowercase_all<I>(names: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    names.into_iter().map(|n| n.as_ref().to_ascii_lowercase()).collect()
}

fn contains_ignore_case(list: &[String], name: &str) -> bool {
    list.iter().any(|n| n.eq_ignore_ascii_case(name))
}

fn title_case(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers() -> Headers {
        [
            ("Content-Type", "application/json"),
            ("Authorization", "Bearer secret"),
            ("x-request-id", "r-1"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn allow_list_is_case_insensitive() {
        let filter = HeaderFilter::new(["CONTENT-TYPE", "authorization"], ["Authorization"], ["password"]);
        let filtered = filter.filter_headers(&headers());

        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.get("content-type"), ["application/json"]);
        assert_eq!(filtered.get("authorization"), [REDACTED]);
        assert!(!filtered.contains("x-request-id"));
    }

    #[test]
    fn wildcard_keeps_every_header() {
        let filter = HeaderFilter::default();
        assert_eq!(filter.filter_headers(&headers()), headers());
    }

    #[test]
    fn filter_headers_is_idempotent() {
        let filter = HeaderFilter::new(["content-type", "authorization"], ["authorization"], ["password"]);
        let once = filter.filter_headers(&headers());
        let twice = filter.filter_headers(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn multi_valued_sensitive_header_collapses_to_one_marker() {
        let mut h = Headers::new();
        h.append("Cookie", "a=1");
        h.append("cookie", "b=2");
        let filtered = HeaderFilter::new(["*"], ["cookie"], Vec::<String>::new()).filter_headers(&h);
        assert_eq!(filtered.get("cookie"), [REDACTED]);
    }

    #[test]
    fn input_redaction_ignores_value_type() {
        let filter = HeaderFilter::new(["*"], Vec::<String>::new(), ["Password", "pin"]);
        let input = json!({"user": "ann", "PASSWORD": {"nested": true}, "pin": 1234});
        let filtered = filter.filter_input(input.as_object().unwrap());

        assert_eq!(filtered["user"], "ann");
        assert_eq!(filtered["PASSWORD"], REDACTED);
        assert_eq!(filtered["pin"], REDACTED);
    }

    #[test]
    fn transformed_headers_are_sorted_and_aligned() {
        let filter = HeaderFilter::default();
        let h: Headers = [("x-request-id", "r-1"), ("accept", "*/*"), ("Accept", "text/html")]
            .into_iter()
            .collect();

        assert_eq!(
            filter.transformed_headers(&h),
            "Accept:       */*\r\nAccept:       text/html\r\nX-Request-Id: r-1\r\n"
        );
    }

    #[test]
    fn transformed_headers_of_nothing_is_empty() {
        assert_eq!(HeaderFilter::default().transformed_headers(&Headers::new()), "");
    }
}

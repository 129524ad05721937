//! Response value object and the conversion back to an `http` response.

use bytes::Bytes;
use http_body_util::Full;

use crate::message::{Message, Parts};
use crate::request::version_str;
use crate::status::reason_phrase;

/// The reply side of an exchange.
///
/// ```rust
/// use observa::{Message, Response};
///
/// let mut res = Response::new(201);
/// res.set_header("location", "/users/42");
/// res.set_body(r#"{"id":42}"#);
///
/// assert_eq!(res.reason_phrase(), "Created");
/// assert_eq!(res.body_size(), 9);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: u16,
    reason: String,
    parts: Parts,
}

impl Response {
    /// Response with `status` and its canonical reason phrase.
    pub fn new(status: u16) -> Self {
        Self { status, reason: reason_phrase(status).to_owned(), parts: Parts::default() }
    }

    /// Builder-style header registration.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parts.headers.append(name, value);
        self
    }

    /// Builder-style body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.parts.body = body.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Sets the status and resets the reason phrase from the status table.
    pub fn set_status(&mut self, status: u16) {
        self.with_status(status, "");
    }

    /// Sets the status; an empty `reason` falls back to the status table.
    pub fn with_status(&mut self, status: u16, reason: &str) {
        self.status = status;
        self.reason = if reason.is_empty() { reason_phrase(status) } else { reason }.to_owned();
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    /// Converts into an `http` response for a hyper-style transport.
    ///
    /// Header values that are not valid on the wire are dropped rather than
    /// failing the whole response.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.parts.body));
        *res.status_mut() = http::StatusCode::from_u16(self.status).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        let headers = res.headers_mut();
        for (name, values) in self.parts.headers.iter() {
            let Ok(name) = http::HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = name, "dropping invalid response header name");
                continue;
            };
            for value in values {
                match http::HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.append(name.clone(), value);
                    }
                    Err(e) => tracing::warn!(header = %name, "dropping invalid response header value: {e}"),
                }
            }
        }
        res
    }

    /// Adapts a response returned by an `http`-based client.
    pub fn from_http(res: http::Response<Bytes>) -> Self {
        let (head, body) = res.into_parts();
        let mut response = Self::new(head.status.as_u16());
        response.parts.version = version_str(head.version).to_owned();
        response.parts.body = body;
        for (name, value) in &head.headers {
            response.parts.headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        response
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

impl Message for Response {
    fn parts(&self) -> &Parts {
        &self.parts
    }

    fn parts_mut(&mut self) -> &mut Parts {
        &mut self.parts
    }
}

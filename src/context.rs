//! Per-call context and its business-result state machine.

use std::collections::HashMap;

use serde_json::Value;

use crate::request::Request;
use crate::response::Response;

/// Business code for a successful call.
pub const BIZ_CODE_SUCCESS: i64 = 1000;

/// Business code recorded when a failure carries no usable code of its own.
pub const BIZ_CODE_UNCLASSIFIED: i64 = 1004;

/// Field/tag name for the business code.
pub const BIZ_CODE: &str = "biz_code";

/// Field/tag name for the business message.
pub const BIZ_MSG: &str = "biz_msg";

/// Application-level outcome of a call, orthogonal to the transport status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BizResult {
    pub code: i64,
    pub message: String,
}

impl BizResult {
    /// `code ∉ {0, 1000}`.
    pub fn is_error(&self) -> bool {
        self.code != BIZ_CODE_SUCCESS && self.code != 0
    }
}

impl Default for BizResult {
    fn default() -> Self {
        Self { code: BIZ_CODE_SUCCESS, message: "success".to_owned() }
    }
}

/// The unit of work one pipeline invocation operates on.
///
/// Owns the request and response, a small local string map, and the business
/// result. Filters receive it as `&mut Context` one at a time; nothing in a
/// single pipeline run touches it concurrently.
///
/// The business result follows one rule for both code and message: once a
/// failure has been recorded, later writes are ignored, so the first failure
/// observed on the way out is the one that gets reported.
#[derive(Debug, Default)]
pub struct Context {
    request: Request,
    response: Response,
    metadata: HashMap<String, String>,
    biz: BizResult,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request, ..Self::default() }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn set_request(&mut self, request: Request) -> &mut Self {
        self.request = request;
        self
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn set_response(&mut self, response: Response) -> &mut Self {
        self.response = response;
        self
    }

    /// Splits the context into its request and response.
    pub fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Local metadata value, or `""` when unset.
    pub fn metadata(&self, key: &str) -> &str {
        self.metadata.get(key).map_or("", String::as_str)
    }

    pub fn biz(&self) -> &BizResult {
        &self.biz
    }

    pub fn biz_code(&self) -> i64 {
        self.biz.code
    }

    pub fn biz_msg(&self) -> &str {
        &self.biz.message
    }

    pub fn is_error(&self) -> bool {
        self.biz.is_error()
    }

    /// Sets the code unless a failure is already recorded.
    pub fn set_biz_code(&mut self, code: i64) {
        if !self.biz.is_error() {
            self.biz.code = code;
        }
    }

    /// Sets the message unless a failure is already recorded.
    pub fn set_biz_msg(&mut self, message: impl Into<String>) {
        if !self.biz.is_error() {
            self.biz.message = message.into();
        }
    }

    /// Sets code and message together unless a failure is already recorded.
    pub fn set_biz_result(&mut self, code: i64, message: impl Into<String>) {
        if !self.biz.is_error() {
            self.biz = BizResult { code, message: message.into() };
        }
    }

    /// Reads `{"code": .., "msg": ..}` from a JSON envelope.
    ///
    /// Missing, zero or empty members are skipped; non-objects are ignored.
    pub fn set_biz_content(&mut self, content: &Value) {
        let Some(obj) = content.as_object() else { return };
        if self.biz.is_error() {
            return;
        }
        let code = obj.get("code").and_then(Value::as_i64).filter(|c| *c != 0);
        let msg = obj.get("msg").and_then(Value::as_str).filter(|m| !m.is_empty());
        match (code, msg) {
            (Some(code), Some(msg)) => self.set_biz_result(code, msg),
            (Some(code), None) => self.set_biz_code(code),
            (None, Some(msg)) => self.set_biz_msg(msg),
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_success() {
        let ctx = Context::default();
        assert_eq!(ctx.biz_code(), 1000);
        assert_eq!(ctx.biz_msg(), "success");
        assert!(!ctx.is_error());
    }

    #[test]
    fn zero_is_not_an_error() {
        let mut ctx = Context::default();
        ctx.set_biz_code(0);
        assert!(!ctx.is_error());
        ctx.set_biz_code(1200);
        assert_eq!(ctx.biz_code(), 1200);
    }

    #[test]
    fn first_failure_wins() {
        let mut ctx = Context::default();
        ctx.set_biz_result(1200, "quota exceeded");
        ctx.set_biz_result(1000, "ok");
        ctx.set_biz_code(0);
        ctx.set_biz_result(1300, "later failure");
        ctx.set_biz_msg("overwritten?");

        assert_eq!(ctx.biz(), &BizResult { code: 1200, message: "quota exceeded".into() });
    }

    #[test]
    fn success_codes_can_be_overwritten_until_a_failure() {
        for codes in [[1000, 0, 1000], [0, 1000, 0], [1000, 1000, 0]] {
            let mut ctx = Context::default();
            for code in codes {
                ctx.set_biz_code(code);
            }
            assert_eq!(ctx.biz_code(), codes[2]);
        }
    }

    #[test]
    fn negative_codes_are_failures() {
        let mut ctx = Context::default();
        ctx.set_biz_code(-1);
        ctx.set_biz_code(1000);
        assert_eq!(ctx.biz_code(), -1);
    }

    #[test]
    fn biz_content_reads_envelope() {
        let mut ctx = Context::default();
        ctx.set_biz_content(&json!({"code": 1500, "msg": "stock empty", "data": null}));
        assert_eq!(ctx.biz_code(), 1500);
        assert_eq!(ctx.biz_msg(), "stock empty");

        ctx.set_biz_content(&json!({"code": 1000, "msg": "ok"}));
        assert_eq!(ctx.biz_code(), 1500);
    }

    #[test]
    fn biz_content_ignores_non_objects_and_empty_members() {
        let mut ctx = Context::default();
        ctx.set_biz_content(&json!([1, 2]));
        ctx.set_biz_content(&json!({"code": 0, "msg": ""}));
        assert_eq!(ctx.biz(), &BizResult::default());
    }

    #[test]
    fn local_metadata_defaults_to_empty() {
        let mut ctx = Context::new(Request::new("GET", "/"));
        assert_eq!(ctx.metadata("route"), "");
        ctx.set_metadata("route", "/orders");
        assert_eq!(ctx.metadata("route"), "/orders");
    }
}

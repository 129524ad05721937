use std::fmt::Write as _;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde_json::{Map, Value};

use super::{Capture, Filter, Side, latency_ms, settle};
use crate::config::{AccessLevel, LoggingConfig};
use crate::context::{BIZ_CODE, BIZ_MSG, Context};
use crate::error::{Outcome, Result};
use crate::log::{GLOBAL_FIELDS, Level, Logger};
use crate::message::Message;
use crate::metadata::CALLER_SERVICE;
use crate::pipeline::{Next, Options};
use crate::scope::Scope;
use crate::service::service_name;

/// One access log line per call.
///
/// The line carries timing, route, status and the business result under
/// `global_fields`, so the log pipeline lifts them to the top level.
/// Headers and bodies are added when configured or when the call is
/// interesting.
///
/// | outcome                     | message             | level           |
/// |-----------------------------|---------------------|-----------------|
/// | slow, business error        | `http server slow`  | error           |
/// | slow                        | `http server slow`  | info            |
/// | business error              | `http server`       | error           |
/// | interesting or access=info  | `http server`       | info            |
/// | anything else               | `http server`       | debug           |
///
/// Client lines read `http client` instead.
#[derive(Debug)]
pub struct LoggingFilter {
    side: Side,
    capture: Capture,
    time_format: String,
    access_level: AccessLevel,
    logger: Logger,
}

impl LoggingFilter {
    /// # Errors
    ///
    /// `Error::InvalidGlob` when an excluded path does not compile.
    pub fn new(side: Side, config: LoggingConfig, logger: Logger) -> Result<Self> {
        Ok(Self {
            side,
            capture: Capture::new(config.capture)?,
            time_format: config.time_format,
            access_level: config.access_level,
            logger,
        })
    }

    fn fields(&self, ctx: &Context, options: &Options, start: SystemTime, latency: f64, interested: bool) -> Map<String, Value> {
        let request = ctx.request();
        let mut fields = Map::new();
        fields.insert("start".into(), self.format_start(start).into());
        fields.insert("kind".into(), self.side.as_str().into());
        fields.insert("component".into(), "http".into());
        fields.insert("method".into(), request.method().into());
        fields.insert("route".into(), request.path().into());
        fields.insert("latency".into(), latency.into());
        match self.side {
            Side::Server => {
                let caller = request.headers().first(CALLER_SERVICE).unwrap_or("unknown");
                fields.insert("caller_service".into(), caller.into());
            }
            Side::Client => {
                let target = service_name(options.service.as_deref().unwrap_or_default());
                fields.insert("target_service".into(), target.into());
            }
        }
        fields.insert("status".into(), ctx.response().status().into());
        fields.insert(BIZ_CODE.into(), ctx.biz_code().into());
        fields.insert(BIZ_MSG.into(), ctx.biz_msg().into());
        if ctx.is_error() {
            fields.insert("error".into(), ctx.biz_msg().into());
        }

        if let Some(headers) = self.capture.request_headers(request, interested) {
            fields.insert("req_header".into(), headers.into());
        }
        if let Some(headers) = self.capture.response_headers(ctx.response(), interested) {
            fields.insert("reply_header".into(), headers.into());
        }
        if let Some(body) = self.capture.request_body(request, interested) {
            fields.insert("req_size".into(), body.size.into());
            if let Some(content) = body.content {
                fields.insert("req_body".into(), content.into());
            }
        }
        if let Some(body) = self.capture.response_body(ctx.response(), interested) {
            fields.insert("reply_size".into(), body.size.into());
            if let Some(content) = body.content {
                fields.insert("reply_body".into(), content.into());
            }
        }
        fields
    }

    /// `start` in the configured format; RFC 3339 if the format is invalid.
    fn format_start(&self, start: SystemTime) -> String {
        let at = DateTime::<Local>::from(start);
        let mut out = String::new();
        if write!(out, "{}", at.format(&self.time_format)).is_err() {
            return at.to_rfc3339();
        }
        out
    }

    fn level(&self, ctx: &Context, slow: bool, interested: bool) -> (Level, String) {
        let base = format!("http {}", self.side.as_str());
        let level = if ctx.is_error() {
            Level::Error
        } else if slow || interested || self.access_level == AccessLevel::Info {
            Level::Info
        } else {
            Level::Debug
        };
        let message = if slow { format!("{base} slow") } else { base };
        (level, message)
    }
}

impl<T> Filter<T> for LoggingFilter {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle(&self, ctx: &mut Context, scope: &mut Scope, next: Next<'_, T>, options: &Options) -> Outcome<T> {
        if self.capture.skips(ctx.request().path()) {
            return next.run(ctx, scope, options);
        }

        let start = options.start_time.unwrap_or_else(SystemTime::now);
        let outcome = next.run(ctx, scope, options);
        let end = options.end_time.unwrap_or_else(SystemTime::now);
        settle(ctx, self.side, &outcome);

        let latency = latency_ms(start, end);
        let slow = self.capture.is_slow(latency);
        let interested = self.capture.interested(ctx, scope, latency);
        let (level, message) = self.level(ctx, slow, interested);

        let mut context = Map::new();
        let fields = self.fields(ctx, options, start, latency, interested);
        context.insert(GLOBAL_FIELDS.to_owned(), Value::Object(fields));
        self.logger.log(level, &message, context, &scope.correlation());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::error::HandlerError;
    use crate::log::{LogPipeline, MemorySink};
    use crate::pipeline::Pipeline;
    use crate::request::Request;
    use serde_json::json;
    use std::time::Duration;

    fn pipeline(side: Side, config: LoggingConfig) -> (Pipeline<()>, MemorySink) {
        let sink = MemorySink::new();
        let logger = Logger::new(LogPipeline::default(), sink.clone());
        let pipeline = Pipeline::builder().filter(LoggingFilter::new(side, config, logger).unwrap()).build().unwrap();
        (pipeline, sink)
    }

    fn ok(ctx: &mut Context, _: &mut Scope, _: &Options) -> Outcome<()> {
        ctx.response_mut().set_body(r#"{"code":1000,"msg":"success","data":[]}"#);
        Ok(())
    }

    #[test]
    fn quiet_server_call() {
        let (pipeline, sink) = pipeline(Side::Server, LoggingConfig::default());
        let req = Request::new("GET", "/orders").with_header("x-md-local-caller_service", "web");
        let mut scope = Scope::default();
        scope.request_id = Some("r-1".into());

        let _ = pipeline.run(req, &mut scope, &ok, &Options::new());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let line = &records[0];
        assert_eq!(line["msg"], json!("http server"));
        assert_eq!(line["level"], json!("info"));
        assert_eq!(line["kind"], json!("server"));
        assert_eq!(line["route"], json!("/orders"));
        assert_eq!(line["caller_service"], json!("web"));
        assert_eq!(line["biz_code"], json!(1000));
        assert_eq!(line["status"], json!(200));
        assert_eq!(line["request_id"], json!("r-1"));
        assert!(!line.contains_key("req_header"));
        assert!(!line.contains_key("reply_body"));
    }

    #[test]
    fn debug_access_level_demotes_quiet_calls() {
        let config = LoggingConfig { access_level: AccessLevel::Debug, ..Default::default() };
        let (pipeline, sink) = pipeline(Side::Server, config);
        let _ = pipeline.run(Request::new("GET", "/orders"), &mut Scope::default(), &ok, &Options::new());
        assert_eq!(sink.records()[0]["level"], json!("debug"));
    }

    #[test]
    fn business_errors_log_at_error_with_full_detail() {
        let (pipeline, sink) = pipeline(Side::Server, LoggingConfig::default());
        let failing = |_: &mut Context, _: &mut Scope, _: &Options| -> Outcome<()> {
            Err(HandlerError::new(1200, "quota exceeded"))
        };
        let req = Request::new("POST", "/orders")
            .with_header("Accept", "*/*")
            .with_body(r#"{"sku":"a-1","password":"p"}"#);

        let out = pipeline.run(req, &mut Scope::default(), &failing, &Options::new());

        assert_eq!(out.outcome.unwrap_err().code(), 1200);
        let line = &sink.records()[0];
        assert_eq!(line["level"], json!("error"));
        assert_eq!(line["biz_code"], json!(1200));
        assert_eq!(line["biz_msg"], json!("quota exceeded"));
        assert_eq!(line["error"], json!("quota exceeded"));
        assert!(line.contains_key("file"));
        assert!(line["req_header"].as_str().unwrap().starts_with("Accept:"));
        let body = line["req_body"].as_str().unwrap();
        assert!(body.contains("a-1"));
        assert!(!body.contains("\"p\""));
    }

    #[test]
    fn envelope_codes_become_the_business_result() {
        let (pipeline, sink) = pipeline(Side::Server, LoggingConfig::default());
        let refused = |ctx: &mut Context, _: &mut Scope, _: &Options| -> Outcome<()> {
            ctx.response_mut().set_body(r#"{"code":1500,"msg":"stock empty"}"#);
            Ok(())
        };
        let out = pipeline.run(Request::new("GET", "/orders"), &mut Scope::default(), &refused, &Options::new());

        assert_eq!(out.context.biz_code(), 1500);
        let line = &sink.records()[0];
        assert_eq!(line["level"], json!("error"));
        assert_eq!(line["reply_body"], json!(r#"{"code":1500,"msg":"stock empty"}"#));
    }

    #[test]
    fn slow_client_call() {
        let (pipeline, sink) = pipeline(Side::Client, LoggingConfig::default());
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let options = Options::new()
            .with_service("micro_service_stock_slb")
            .with_start_time(start)
            .with_end_time(start + Duration::from_millis(3500));
        let mut ctx = Context::new(Request::new("GET", "http://stock/items"));

        pipeline.handle(&mut ctx, &mut Scope::default(), &ok, &options).unwrap();

        let line = &sink.records()[0];
        assert_eq!(line["msg"], json!("http client slow"));
        assert_eq!(line["level"], json!("info"));
        assert_eq!(line["latency"], json!(3500.0));
        assert_eq!(line["target_service"], json!("stock"));
        assert_eq!(line["kind"], json!("client"));
        assert!(!line.contains_key("reply_header"));
        assert!(line.contains_key("reply_body"));
    }

    #[test]
    fn excluded_paths_log_nothing() {
        let config = LoggingConfig {
            capture: CaptureConfig { excluded_paths: vec!["/health".into()], ..Default::default() },
            ..Default::default()
        };
        let (pipeline, sink) = pipeline(Side::Server, config);
        let out = pipeline.run(Request::new("GET", "/health"), &mut Scope::default(), &ok, &Options::new());
        assert!(out.outcome.is_ok());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn invalid_time_format_falls_back() {
        let config = LoggingConfig { time_format: "%Q".into(), ..Default::default() };
        let (pipeline, sink) = pipeline(Side::Server, config);
        let _ = pipeline.run(Request::new("GET", "/"), &mut Scope::default(), &ok, &Options::new());
        assert!(sink.records()[0]["start"].as_str().unwrap().contains('T'));
    }
}

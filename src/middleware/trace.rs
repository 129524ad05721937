use std::time::SystemTime;

use base64::{Engine as _, engine::general_purpose};

use super::{Capture, Filter, Side, TRACE_ID_RESPONSE_HEADER, latency_ms, settle};
use crate::config::CaptureConfig;
use crate::context::{BIZ_CODE, Context};
use crate::error::{Outcome, Result};
use crate::message::Message;
use crate::metadata::CALLER_SERVICE;
use crate::pipeline::{Next, Options};
use crate::scope::Scope;
use crate::service::service_name;
use crate::trace::{Endpoint, Span, SpanKind, TRACE_ID_HEADER};

/// One span per call.
///
/// Server side: continues an inbound B3 context (or starts a new trace),
/// records the trace id in the scope and echoes it on the response.
/// Client side: starts a child of the request's root span and injects B3
/// headers into the outbound request.
///
/// Once the call returns the span gets the business result and status, plus
/// headers and bodies when capture is configured or the call is interesting.
/// Interesting calls force the whole trace to be sampled.
#[derive(Debug)]
pub struct TraceFilter {
    side: Side,
    capture: Capture,
}

impl TraceFilter {
    /// # Errors
    ///
    /// `Error::InvalidGlob` when an excluded path does not compile.
    pub fn new(side: Side, config: CaptureConfig) -> Result<Self> {
        Ok(Self { side, capture: Capture::new(config)? })
    }

    fn start(&self, ctx: &mut Context, scope: &mut Scope, options: &Options, start: SystemTime) -> Span {
        let request = ctx.request();
        let method = request.method().to_owned();
        let path = request.path().to_owned();

        let span = match self.side {
            Side::Server => {
                let parent = scope.tracer.propagation().extract(request.headers());
                if parent.as_ref().is_some_and(|p| p.debug) {
                    scope.debug = true;
                }
                let span = scope.tracer.start_span(&format!("HTTP Server {method}: {path}"), parent.as_ref(), start);
                let trace_id = span.trace_id().map(str::to_owned).or_else(|| parent.map(|p| p.trace_id));
                if trace_id.is_some() {
                    scope.trace_id = trace_id;
                }
                span.set_kind(SpanKind::Server);
                span.tag("caller.service_name", request.headers().first(CALLER_SERVICE).unwrap_or("unknown"));
                span.tag("http.user_agent", request.header_line("user-agent"));
                span
            }
            Side::Client => {
                let span = scope.tracer.start_span(&format!("HTTP Client {method}: {path}"), None, start);
                let target = service_name(options.service.as_deref().unwrap_or_default());
                span.set_kind(SpanKind::Client);
                span.set_remote_endpoint(Endpoint::service(target.as_str()));
                span.tag("target.service_name", target);
                span
            }
        };

        let request = ctx.request();
        span.tag("http.method", method);
        span.tag("http.path", path);
        span.tag("http.host", request.target().host().unwrap_or_default());
        span.tag("http.url", request.target().to_string());

        if self.side == Side::Client {
            if let Some(context) = span.context() {
                scope.tracer.propagation().inject(&context, ctx.request_mut().headers_mut());
            }
        }
        span
    }

    fn terminate(&self, span: &Span, ctx: &Context, scope: &Scope, latency: f64) {
        let interested = self.capture.interested(ctx, scope, latency);

        span.tag(BIZ_CODE, ctx.biz_code());
        if ctx.is_error() {
            span.tag("error", ctx.biz_msg());
        }
        span.tag("http.status_code", ctx.response().status());

        if let Some(headers) = self.capture.request_headers(ctx.request(), interested) {
            span.tag("http.request.headers", general_purpose::STANDARD.encode(headers));
        }
        if let Some(headers) = self.capture.response_headers(ctx.response(), interested) {
            span.tag("http.response.headers", general_purpose::STANDARD.encode(headers));
        }
        if let Some(body) = self.capture.request_body(ctx.request(), interested) {
            span.tag("http.request.size", body.size);
            if let Some(content) = body.content {
                span.tag("http.request.body", general_purpose::STANDARD.encode(content));
            }
        }
        if let Some(body) = self.capture.response_body(ctx.response(), interested) {
            span.tag("http.response.size", body.size);
            if let Some(content) = body.content {
                span.tag("http.response.body", general_purpose::STANDARD.encode(content));
            }
        }

        if interested {
            span.force_sample();
        }
    }
}

impl<T> Filter<T> for TraceFilter {
    fn name(&self) -> &str {
        "trace"
    }

    fn handle(&self, ctx: &mut Context, scope: &mut Scope, next: Next<'_, T>, options: &Options) -> Outcome<T> {
        if self.capture.skips(ctx.request().path()) {
            return next.run(ctx, scope, options);
        }

        let start = options.start_time.unwrap_or_else(SystemTime::now);
        let span = self.start(ctx, scope, options, start);

        let outcome = next.run(ctx, scope, options);
        let end = options.end_time.unwrap_or_else(SystemTime::now);
        settle(ctx, self.side, &outcome);

        if self.side == Side::Server {
            if let Some(trace_id) = &scope.trace_id {
                let headers = ctx.response_mut().headers_mut();
                headers.replace(TRACE_ID_HEADER, trace_id.as_str());
                headers.replace(TRACE_ID_RESPONSE_HEADER, trace_id.as_str());
            }
        }

        self.terminate(&span, ctx, scope, latency_ms(start, end));
        span.finish_at(end);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::pipeline::Pipeline;
    use crate::request::Request;
    use crate::trace::{MemoryReporter, Sampler, TracerProvider, ZipkinSettings};
    use std::time::Duration;

    fn scope(sampler: Sampler) -> (Scope, MemoryReporter) {
        let reporter = MemoryReporter::new();
        let provider = TracerProvider::zipkin(ZipkinSettings::new("orders").sampler(sampler).reporter(reporter.clone()));
        (Scope::new(provider.tracer()), reporter)
    }

    fn server(config: CaptureConfig) -> Pipeline<()> {
        Pipeline::builder().filter(TraceFilter::new(Side::Server, config).unwrap()).build().unwrap()
    }

    fn ok(_: &mut Context, _: &mut Scope, _: &Options) -> Outcome<()> {
        Ok(())
    }

    #[test]
    fn server_continues_inbound_trace() {
        let (mut scope, reporter) = scope(Sampler::Always);
        let req = Request::new("GET", "/orders")
            .with_header("X-B3-TraceId", "463ac35c9f6413ad")
            .with_header("X-B3-SpanId", "a2fb4a1d1a96d312")
            .with_header("X-B3-Sampled", "1");

        let out = server(CaptureConfig::default()).run(req, &mut scope, &ok, &Options::new());

        let res = out.context.response();
        assert_eq!(res.header_line("x-b3-traceid"), "463ac35c9f6413ad");
        assert_eq!(res.header_line("x-trace-id"), "463ac35c9f6413ad");

        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "HTTP Server GET: /orders");
        assert_eq!(spans[0].parent_id.as_deref(), Some("a2fb4a1d1a96d312"));
        assert_eq!(spans[0].kind, Some(SpanKind::Server));
        assert_eq!(spans[0].tags["biz_code"], "1000");
        assert_eq!(spans[0].tags["caller.service_name"], "unknown");
        assert!(spans[0].tags.contains_key("process.pid"));
    }

    #[test]
    fn failures_tag_the_span_and_force_sampling() {
        let (mut scope, reporter) = scope(Sampler::Never);
        let failing = |_: &mut Context, _: &mut Scope, _: &Options| -> Outcome<()> {
            Err(HandlerError::new(1200, "quota exceeded"))
        };
        let req = Request::new("POST", "/orders").with_body(r#"{"sku":"a-1"}"#);

        let out = server(CaptureConfig::default()).run(req, &mut scope, &failing, &Options::new());

        assert_eq!(out.outcome.unwrap_err().code(), 1200);
        assert_eq!(out.context.biz_code(), 1200);
        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        let tags = &spans[0].tags;
        assert_eq!(tags["error"], "quota exceeded");
        assert_eq!(tags["biz_code"], "1200");
        assert_eq!(tags["http.request.size"], "13");
        assert_eq!(tags["http.request.body"], general_purpose::STANDARD.encode(r#"{"sku":"a-1"}"#));
    }

    #[test]
    fn slow_calls_are_interesting() {
        let (mut scope, reporter) = scope(Sampler::Never);
        let start = SystemTime::now();
        let options = Options::new().with_start_time(start).with_end_time(start + Duration::from_secs(4));
        let req = Request::new("GET", "/orders").with_header("Accept", "*/*");

        let _ = server(CaptureConfig::default()).run(req, &mut scope, &ok, &options);

        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].duration, 4_000_000);
        assert!(spans[0].tags.contains_key("http.request.headers"));
    }

    #[test]
    fn b3_debug_flag_turns_on_full_capture() {
        let (mut scope, reporter) = scope(Sampler::Never);
        let req = Request::new("GET", "/orders")
            .with_header("X-B3-TraceId", "463ac35c9f6413ad")
            .with_header("X-B3-SpanId", "a2fb4a1d1a96d312")
            .with_header("X-B3-Flags", "1")
            .with_header("Accept", "*/*");
        let seen_debug = |_: &mut Context, scope: &mut Scope, _: &Options| -> Outcome<bool> { Ok(scope.debug) };

        let out = Pipeline::builder()
            .filter(TraceFilter::new(Side::Server, CaptureConfig::default()).unwrap())
            .build()
            .unwrap()
            .run(req, &mut scope, &seen_debug, &Options::new());

        assert!(out.outcome.unwrap());
        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].tags.contains_key("http.request.headers"));
    }

    #[test]
    fn quiet_calls_respect_the_sampler() {
        let (mut scope, reporter) = scope(Sampler::Never);
        let _ = server(CaptureConfig::default()).run(Request::new("GET", "/orders"), &mut scope, &ok, &Options::new());
        assert!(reporter.spans().is_empty());
    }

    #[test]
    fn excluded_paths_get_no_span() {
        let (mut scope, reporter) = scope(Sampler::Always);
        let config = CaptureConfig { excluded_paths: vec!["/health".into()], ..Default::default() };
        let out = server(config).run(Request::new("GET", "/health"), &mut scope, &ok, &Options::new());

        assert!(!out.context.response().has_header("x-trace-id"));
        assert!(reporter.spans().is_empty());
    }

    #[test]
    fn client_spans_are_children_of_the_root_and_propagate() {
        let (mut scope, reporter) = scope(Sampler::Always);
        let root = scope.tracer.start_span("HTTP Server GET: /orders", None, SystemTime::now());
        let client = Pipeline::<()>::builder()
            .filter(TraceFilter::new(Side::Client, CaptureConfig::default()).unwrap())
            .build()
            .unwrap();
        let mut ctx = Context::new(Request::new("GET", "http://stock.internal/items"));

        client.handle(&mut ctx, &mut scope, &ok, &Options::new().with_service("ms.stock")).unwrap();

        let req = ctx.request();
        assert_eq!(Some(req.header_line("x-b3-traceid").as_str()), root.trace_id());
        assert_eq!(req.header_line("x-b3-sampled"), "1");

        scope.finish();
        let spans = reporter.spans();
        assert_eq!(spans.len(), 2);
        let child = spans.iter().find(|s| s.kind == Some(SpanKind::Client)).unwrap();
        assert_eq!(child.name, "HTTP Client GET: /items");
        assert_eq!(child.parent_id.as_deref(), root.span_id());
        assert_eq!(child.tags["target.service_name"], "stock");
        assert_eq!(child.tags["http.host"], "stock.internal");
        assert_eq!(req.header_line("x-b3-spanid"), child.id);
    }
}

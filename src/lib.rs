//! # observa
//!
//! Observability middleware for HTTP exchanges: trace context, structured
//! access logs and business results, attached to every inbound request and
//! outbound call.
//!
//! ## The model
//!
//! - A [`Pipeline`] wraps a final [`Handler`] in ordered [`Filter`]s, onion
//!   style. Teardown runs in reverse entry order and errors always come back
//!   out unchanged.
//! - A [`Context`] carries one request, one response and the business result
//!   (`biz_code`/`biz_msg`, first failure wins).
//! - A [`Scope`] holds everything request-scoped: the [`Metadata`] store, the
//!   per-request [`Tracer`](trace::Tracer), the request id, the trace id and the
//!   debug flag. One per request, passed explicitly, never shared.
//! - The built-in filters (request id, metadata, trace, logging) come in a
//!   server and a client flavour; see [`middleware`].
//! - Log lines go through a seven-stage [`LogPipeline`](log::LogPipeline)
//!   before they reach a [`LogSink`](log::LogSink).
//!
//! What observa leaves to its host: routing, connection handling, and
//! exporting spans beyond the [`Reporter`](trace::Reporter) seam.
//!
//! ## Quick start
//!
//! ```rust
//! use observa::log::{LogPipeline, Logger, MemorySink};
//! use observa::trace::{MemoryReporter, TracerProvider, ZipkinSettings};
//! use observa::{
//!     Context, HandlerError, Message, ObservabilityConfig, Options, Outcome, Pipeline, Request,
//!     Scope, Side,
//! };
//!
//! let config = ObservabilityConfig::default();
//! let sink = MemorySink::new();
//! let logger = Logger::new(LogPipeline::new(config.service.clone()), sink.clone());
//! let reporter = MemoryReporter::new();
//! let provider = TracerProvider::zipkin(ZipkinSettings::new("orders").reporter(reporter.clone()));
//!
//! let pipeline = Pipeline::standard(Side::Server, &config, logger).unwrap();
//!
//! let place_order = |ctx: &mut Context, _: &mut Scope, _: &Options| -> Outcome<()> {
//!     if ctx.request().body().is_empty() {
//!         return Err(HandlerError::new(1200, "empty order"));
//!     }
//!     ctx.response_mut().set_status(201);
//!     Ok(())
//! };
//!
//! let mut scope = Scope::new(provider.tracer());
//! let request = Request::new("POST", "/orders").with_body(r#"{"sku":"a-1"}"#);
//! let exchange = pipeline.run(request, &mut scope, &place_order, &Options::new());
//!
//! assert!(exchange.outcome.is_ok());
//! let response = exchange.context.response();
//! assert_eq!(response.status(), 201);
//! assert!(response.has_header("x-request-id"));
//! assert!(response.has_header("x-b3-traceid"));
//! assert_eq!(sink.records()[0]["msg"], "http server");
//! assert_eq!(reporter.spans().len(), 1);
//! ```

mod context;
mod error;
mod handler;
mod header_filter;
mod message;
mod metadata;
mod pipeline;
mod request;
mod response;
mod scope;
mod service;

pub mod config;
pub mod log;
pub mod middleware;
pub mod status;
pub mod trace;

pub use config::ObservabilityConfig;
pub use context::{BIZ_CODE, BIZ_CODE_SUCCESS, BIZ_CODE_UNCLASSIFIED, BIZ_MSG, BizResult, Context};
pub use error::{ConfigError, Error, HandlerError, Outcome, Result};
pub use handler::Handler;
pub use header_filter::{HeaderFilter, REDACTED};
pub use message::{Headers, Message};
pub use metadata::{CALLER_SERVICE, GLOBAL_PREFIX, LOCAL_PREFIX, Metadata, has_prefix};
pub use middleware::{Filter, Side};
pub use pipeline::{DEFAULT_FILTERS, Exchange, FilterRegistry, Next, Options, Pipeline, PipelineBuilder};
pub use request::{Request, Target};
pub use response::Response;
pub use scope::Scope;
pub use service::{ServiceInfo, service_name};

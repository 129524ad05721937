//! An orders service with observa on both sides of every exchange.
//!
//! Inbound requests run through the server pipeline; the order handler makes
//! an outbound call to a (simulated) stock service through the client
//! pipeline, inside the same request scope.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/orders/42
//!   curl -i -X POST http://localhost:3000/orders \
//!        -H 'x-md-global-tenant: acme' -H 'Mp-Debug: 1' \
//!        -d '{"sku":"a-1","password":"hunter2"}'
//!   curl -i http://localhost:3000/health

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use observa::log::Logger;
use observa::trace::TracerProvider;
use observa::{
    Context, HandlerError, Message, ObservabilityConfig, Options, Outcome, Pipeline, Request, Response, Scope,
    Side,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

struct App {
    provider: TracerProvider,
    server: Pipeline<()>,
    client: Pipeline<Response>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut config = ObservabilityConfig::from_env()?;
    if config.middleware.server.logging.capture.excluded_paths.is_empty() {
        config.middleware.server.logging.capture.excluded_paths = vec!["/health".into()];
        config.middleware.server.trace.excluded_paths = vec!["/health".into()];
    }

    let logger = Logger::tracing(observa::log::LogPipeline::new(config.service.clone()));
    let app = Arc::new(App {
        provider: TracerProvider::from_config(&config)?,
        server: Pipeline::standard(Side::Server, &config, logger.clone())?,
        client: Pipeline::standard(Side::Client, &config, logger)?,
    });

    let addr: SocketAddr = "0.0.0.0:3000".parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, service = %config.service.app_name, "orders listening");

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!("accept error: {e}");
                continue;
            }
        };
        let app = Arc::clone(&app);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let app = Arc::clone(&app);
                async move { dispatch(app, req).await }
            });
            if let Err(e) = ConnBuilder::new(TokioExecutor::new()).serve_connection(io, svc).await {
                error!(peer = %remote_addr, "connection error: {e}");
            }
        });
    }
}

/// Buffers the body, then runs the synchronous pipeline off the async workers.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (head, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("reading request body: {e}");
            return Ok(Response::new(400).into_http());
        }
    };
    let request = Request::from_http(http::Request::from_parts(head, body));

    let response = tokio::task::spawn_blocking(move || {
        let mut scope = Scope::new(app.provider.tracer());
        let handler = |ctx: &mut Context, scope: &mut Scope, options: &Options| -> Outcome<()> {
            route(&app, ctx, scope, options)
        };
        let exchange = app.server.run(request, &mut scope, &handler, &Options::new());
        let mut ctx = exchange.context;
        if let Err(err) = exchange.outcome {
            ctx.response_mut().set_status(500);
            let _ = ctx.response_mut().set_json_body(&json!({"code": err.biz_code(), "msg": err.message()}));
        }
        let (_, response) = ctx.into_parts();
        response
    })
    .await
    .unwrap_or_else(|e| {
        error!("pipeline task failed: {e}");
        Response::new(500)
    });

    Ok(response.into_http())
}

fn route(app: &App, ctx: &mut Context, scope: &mut Scope, _: &Options) -> Outcome<()> {
    let method = ctx.request().method().to_owned();
    let path = ctx.request().path().to_owned();
    match (method.as_str(), path.as_str()) {
        ("GET", "/health") => reply(ctx, 200, json!({"status": "ok"})),
        ("GET", p) if p.starts_with("/orders/") => {
            let id = p.trim_start_matches("/orders/");
            reply(ctx, 200, json!({"code": 1000, "msg": "success", "data": {"id": id}}))
        }
        ("POST", "/orders") => {
            let order = ctx.request().data().ok_or_else(|| HandlerError::new(1201, "order must be JSON"))?;
            let stock = check_stock(app, scope, order["sku"].as_str().unwrap_or_default())?;
            reply(ctx, 201, json!({"code": 1000, "msg": "success", "data": {"order": order, "stock": stock}}))
        }
        _ => reply(ctx, 404, json!({"code": 1404, "msg": "not found"})),
    }
}

/// An outbound call through the client pipeline. The downstream service is
/// simulated: it echoes back what arrived on the wire.
fn check_stock(app: &App, scope: &mut Scope, sku: &str) -> Outcome<serde_json::Value> {
    let mut ctx = Context::new(Request::new("GET", &format!("http://stock.internal/items/{sku}")));
    let call = |ctx: &mut Context, _: &mut Scope, _: &Options| -> Outcome<Response> {
        let seen: serde_json::Map<_, _> = ctx
            .request()
            .headers()
            .iter()
            .map(|(name, values)| (name.to_owned(), json!(values)))
            .collect();
        let mut res = Response::new(200);
        res.set_json_body(&json!({"available": 3, "headers_seen": seen})).map_err(HandlerError::from_error)?;
        ctx.set_response(res.clone());
        Ok(res)
    };
    let options = Options::new().with_service("ms.stock");
    let res = app.client.handle(&mut ctx, scope, &call, &options)?;
    Ok(res.data().unwrap_or_default())
}

fn reply(ctx: &mut Context, status: u16, body: serde_json::Value) -> Outcome<()> {
    let res = ctx.response_mut();
    res.set_status(status);
    res.set_header("content-type", "application/json");
    res.set_json_body(&body).map_err(HandlerError::from_error)
}

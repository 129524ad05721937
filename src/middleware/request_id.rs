use tracing::debug;
use uuid::Uuid;

use super::{DEBUG_HEADER, Filter, REQUEST_ID_HEADER};
use crate::context::Context;
use crate::error::Outcome;
use crate::message::Message;
use crate::metadata::CALLER_SERVICE;
use crate::pipeline::{Next, Options};
use crate::scope::Scope;
use crate::trace::TRACE_ID_HEADER;

/// Seeds the identifiers every later stage relies on.
///
/// The request id comes from the `X-Request-Id` header, else from the scope,
/// else a fresh UUID v4. It is stored in the scope, written onto the request
/// together with the known trace id and debug flag, and echoed on the
/// response once the rest of the chain is done.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdFilter;

impl RequestIdFilter {
    pub fn new() -> Self {
        Self
    }
}

impl<T> Filter<T> for RequestIdFilter {
    fn name(&self) -> &str {
        "request_id"
    }

    fn handle(&self, ctx: &mut Context, scope: &mut Scope, next: Next<'_, T>, options: &Options) -> Outcome<T> {
        let request = ctx.request_mut();
        if request.headers().first(DEBUG_HEADER).is_some_and(is_truthy) {
            scope.debug = true;
        }

        let request_id = match request.headers().first(REQUEST_ID_HEADER).filter(|id| !id.is_empty()) {
            Some(id) => id.to_owned(),
            None => match scope.request_id.clone() {
                Some(id) => id,
                None => {
                    let caller = request.headers().first(CALLER_SERVICE).unwrap_or("unknown");
                    debug!(caller, route = request.path(), "generating request id");
                    Uuid::new_v4().to_string()
                }
            },
        };
        scope.request_id = Some(request_id.clone());

        let headers = request.headers_mut();
        headers.replace(REQUEST_ID_HEADER, request_id.as_str());
        if let Some(trace_id) = &scope.trace_id {
            headers.replace(TRACE_ID_HEADER, trace_id.as_str());
        }
        if scope.debug {
            headers.replace(DEBUG_HEADER, "1");
        }

        let outcome = next.run(ctx, scope, options);
        ctx.response_mut().headers_mut().replace(REQUEST_ID_HEADER, request_id);
        outcome
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false")
}

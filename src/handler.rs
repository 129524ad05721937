//! The final handler: the innermost operation a pipeline wraps.
//!
//! For a server pipeline this is the route handler; for a client pipeline it
//! is the outbound call itself. Filters reach it through
//! [`Next`](crate::Next):
//!
//! ```text
//! pipeline.run(request, scope, &handler, options)
//!        ↓
//! filter[0].handle(ctx, scope, next, options)
//!        ↓  next.run(ctx, scope, options)
//! filter[1].handle(…)
//!        ↓  …
//! handler.call(ctx, scope, options)          ← runs exactly once
//! ```
//!
//! Any `Fn(&mut Context, &mut Scope, &Options) -> Outcome<T>` is a handler.
//! Closures need their parameter types spelled out so the compiler can see
//! they accept any borrow:
//!
//! ```rust
//! use observa::{Context, Handler, Options, Outcome, Scope};
//!
//! let handler = |ctx: &mut Context, _: &mut Scope, _: &Options| -> Outcome<u16> {
//!     ctx.response_mut().set_status(204);
//!     Ok(204)
//! };
//!
//! let mut ctx = Context::default();
//! let out = handler.call(&mut ctx, &mut Scope::default(), &Options::default());
//! assert_eq!(out.unwrap(), 204);
//! ```

use crate::context::Context;
use crate::error::Outcome;
use crate::pipeline::Options;
use crate::scope::Scope;

/// Terminal operation of a pipeline, producing `T` or a [`HandlerError`](crate::HandlerError).
pub trait Handler<T>: Send + Sync {
    fn call(&self, ctx: &mut Context, scope: &mut Scope, options: &Options) -> Outcome<T>;
}

impl<T, F> Handler<T> for F
where
    F: Fn(&mut Context, &mut Scope, &Options) -> Outcome<T> + Send + Sync,
{
    fn call(&self, ctx: &mut Context, scope: &mut Scope, options: &Options) -> Outcome<T> {
        self(ctx, scope, options)
    }
}

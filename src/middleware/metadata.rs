use super::{Filter, Side};
use crate::context::Context;
use crate::error::Outcome;
use crate::message::Message;
use crate::metadata::{GLOBAL_PREFIX, has_prefix};
use crate::pipeline::{Next, Options};
use crate::scope::Scope;

/// Prefix a server accepts inbound metadata under: global and local keys.
const INBOUND_PREFIX: &str = "x-md-";

/// Moves prefixed metadata between headers and the scope's store.
///
/// On the server side, inbound headers under a prefix are copied into the
/// store. On the client side, store entries under a propagation prefix are
/// written onto the outbound request, after any constant headers.
/// Prefix matching is a literal, case-insensitive `starts_with`.
#[derive(Clone, Debug)]
pub struct MetadataFilter {
    side: Side,
    prefixes: Vec<String>,
    constants: Vec<(String, String)>,
}

impl MetadataFilter {
    /// Extracts every `x-md-` header into the store.
    pub fn server() -> Self {
        Self { side: Side::Server, prefixes: vec![INBOUND_PREFIX.to_owned()], constants: Vec::new() }
    }

    /// Forwards store entries under `prefixes`; an empty list means `x-md-global-`.
    pub fn client(prefixes: Vec<String>) -> Self {
        let prefixes = if prefixes.is_empty() { vec![GLOBAL_PREFIX.to_owned()] } else { prefixes };
        Self { side: Side::Client, prefixes, constants: Vec::new() }
    }

    /// Overrides the prefixes this filter matches.
    #[must_use]
    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// A header written onto every outbound request.
    #[must_use]
    pub fn with_constant(mut self, name: &str, value: impl Into<String>) -> Self {
        self.constants.push((name.to_owned(), value.into()));
        self
    }

    fn extract(&self, ctx: &Context, scope: &mut Scope) {
        for (name, values) in ctx.request().headers().iter() {
            if has_prefix(name, &self.prefixes) {
                for value in values {
                    scope.metadata.add(name, value.as_str());
                }
            }
        }
    }

    fn inject(&self, ctx: &mut Context, scope: &Scope) {
        let headers = ctx.request_mut().headers_mut();
        for (name, value) in &self.constants {
            headers.replace(name, value.as_str());
        }
        for (name, values) in scope.metadata.with_prefixes(&self.prefixes) {
            for value in values {
                headers.append(name, value.as_str());
            }
        }
    }
}

impl<T> Filter<T> for MetadataFilter {
    fn name(&self) -> &str {
        "metadata"
    }

    fn handle(&self, ctx: &mut Context, scope: &mut Scope, next: Next<'_, T>, options: &Options) -> Outcome<T> {
        match self.side {
            Side::Server => self.extract(ctx, scope),
            Side::Client => self.inject(ctx, scope),
        }
        next.run(ctx, scope, options)
    }
}

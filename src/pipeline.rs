//! Onion-style filter pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Filter`]s wrapped around a final
//! [`Handler`]. `filters[0]` wraps `filters[1]` wraps … wraps the handler.
//! Each filter receives a [`Next`] for the rest of the chain and decides
//! whether, and when, to run it; code after `next.run(..)` is teardown, so
//! teardown happens in reverse entry order.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use crate::config::ObservabilityConfig;
use crate::context::Context;
use crate::error::{Error, Outcome, Result};
use crate::handler::Handler;
use crate::log::Logger;
use crate::metadata::CALLER_SERVICE;
use crate::middleware::{Filter, LoggingFilter, MetadataFilter, RequestIdFilter, Side, TraceFilter};
use crate::request::Request;
use crate::scope::{Scope, ScopeGuard};

/// Names of the default filter chain, outermost first.
pub const DEFAULT_FILTERS: [&str; 4] = ["request_id", "metadata", "trace", "logging"];

/// Per-call options handed to every filter and the final handler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options {
    /// Downstream service name, for client-side fields and tags.
    pub service: Option<String>,
    /// Overrides the measured start of the call.
    pub start_time: Option<SystemTime>,
    /// Overrides the measured end of the call.
    pub end_time: Option<SystemTime>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[must_use]
    pub fn with_start_time(mut self, at: SystemTime) -> Self {
        self.start_time = Some(at);
        self
    }

    #[must_use]
    pub fn with_end_time(mut self, at: SystemTime) -> Self {
        self.end_time = Some(at);
        self
    }
}

/// The rest of the chain, as seen from one filter.
pub struct Next<'a, T> {
    filters: &'a [Box<dyn Filter<T>>],
    handler: &'a dyn Handler<T>,
}

impl<'a, T> Next<'a, T> {
    pub(crate) fn new(filters: &'a [Box<dyn Filter<T>>], handler: &'a dyn Handler<T>) -> Self {
        Self { filters, handler }
    }

    /// Runs the next filter, or the final handler once the filters are used up.
    ///
    /// Consumes `self`, so a filter can continue the chain at most once.
    pub fn run(self, ctx: &mut Context, scope: &mut Scope, options: &Options) -> Outcome<T> {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.handle(ctx, scope, Next::new(rest, self.handler), options),
            None => self.handler.call(ctx, scope, options),
        }
    }
}

/// What a top-level [`Pipeline::run`] hands back to the transport.
#[derive(Debug)]
pub struct Exchange<T> {
    /// The context after every filter has torn down; its response is the reply.
    pub context: Context,
    /// The final handler's value or the original failure.
    pub outcome: Outcome<T>,
}

/// An ordered filter chain.
///
/// ```rust
/// use observa::{Context, Options, Outcome, Pipeline, Request, Scope};
///
/// let pipeline = Pipeline::<u16>::new();
/// let handler = |ctx: &mut Context, _: &mut Scope, _: &Options| -> Outcome<u16> {
///     Ok(ctx.response().status())
/// };
///
/// let exchange = pipeline.run(Request::new("GET", "/"), &mut Scope::default(), &handler, &Options::new());
/// assert_eq!(exchange.outcome.unwrap(), 200);
/// ```
pub struct Pipeline<T> {
    filters: Vec<Box<dyn Filter<T>>>,
}

impl<T> Pipeline<T> {
    /// A pipeline with no filters.
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn builder<'r>() -> PipelineBuilder<'r, T> {
        PipelineBuilder { registry: None, entries: Vec::new() }
    }

    /// Filter names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Runs the chain over an existing context.
    ///
    /// Nothing is finalized: use this for a call nested inside a request that
    /// something else owns, such as an outbound call made by a route handler.
    pub fn handle(&self, ctx: &mut Context, scope: &mut Scope, handler: &dyn Handler<T>, options: &Options) -> Outcome<T> {
        Next::new(&self.filters, handler).run(ctx, scope, options)
    }

    /// Entry point for one inbound request.
    ///
    /// Wraps `request` in a fresh [`Context`], runs the chain, and finishes
    /// the scope on every exit path, unwinding included: the tracer is
    /// flushed and the metadata store cleared.
    pub fn run(&self, request: Request, scope: &mut Scope, handler: &dyn Handler<T>, options: &Options) -> Exchange<T> {
        let mut ctx = Context::new(request);
        let mut scope = ScopeGuard::new(scope);
        let outcome = self.handle(&mut ctx, &mut scope, handler, options);
        Exchange { context: ctx, outcome }
    }
}

impl<T: 'static> Pipeline<T> {
    /// The default chain for `side`: request id, metadata, trace, logging.
    ///
    /// # Errors
    ///
    /// `Error::InvalidGlob` when an excluded path does not compile.
    pub fn standard(side: Side, config: &ObservabilityConfig, logger: Logger) -> Result<Self> {
        let registry = FilterRegistry::standard(side, config, logger);
        Self::builder().registry(&registry).named_all(DEFAULT_FILTERS).build()
    }
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("filters", &self.names()).finish()
    }
}

enum Entry<T> {
    Instance(Box<dyn Filter<T>>),
    Named(String),
}

/// Collects filters by instance or by registered name; names resolve in
/// [`build`](Self::build).
pub struct PipelineBuilder<'r, T> {
    registry: Option<&'r FilterRegistry<T>>,
    entries: Vec<Entry<T>>,
}

impl<'r, T> PipelineBuilder<'r, T> {
    /// Registry used to resolve [`named`](Self::named) entries.
    #[must_use]
    pub fn registry(mut self, registry: &'r FilterRegistry<T>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Filter<T> + 'static) -> Self {
        self.entries.push(Entry::Instance(Box::new(filter)));
        self
    }

    #[must_use]
    pub fn boxed(mut self, filter: Box<dyn Filter<T>>) -> Self {
        self.entries.push(Entry::Instance(filter));
        self
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.entries.push(Entry::Named(name.to_owned()));
        self
    }

    #[must_use]
    pub fn named_all<I>(self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        names.into_iter().fold(self, |b, name| b.named(name.as_ref()))
    }

    /// # Errors
    ///
    /// `Error::InvalidMiddleware` for a name the registry does not know (or
    /// any name when no registry was given); whatever a constructor returns.
    pub fn build(self) -> Result<Pipeline<T>> {
        let mut filters = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            let filter = match entry {
                Entry::Instance(filter) => filter,
                Entry::Named(name) => match self.registry {
                    Some(registry) => registry.create(&name)?,
                    None => return Err(Error::InvalidMiddleware(name)),
                },
            };
            filters.push(filter);
        }
        Ok(Pipeline { filters })
    }
}

type Constructor<T> = Box<dyn Fn() -> Result<Box<dyn Filter<T>>> + Send + Sync>;

/// Stable names mapped to filter constructors.
pub struct FilterRegistry<T> {
    constructors: HashMap<String, Constructor<T>>,
}

impl<T> FilterRegistry<T> {
    pub fn new() -> Self {
        Self { constructors: HashMap::new() }
    }

    /// Registers `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn Filter<T>>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.to_owned(), Box::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// # Errors
    ///
    /// `Error::InvalidMiddleware` when `name` is not registered.
    pub fn create(&self, name: &str) -> Result<Box<dyn Filter<T>>> {
        match self.constructors.get(name) {
            Some(constructor) => constructor(),
            None => Err(Error::InvalidMiddleware(name.to_owned())),
        }
    }
}

impl<T: 'static> FilterRegistry<T> {
    /// The four built-in filters for `side`, configured from `config`.
    pub fn standard(side: Side, config: &ObservabilityConfig, logger: Logger) -> Self {
        let mut registry = Self::new();
        let settings = side.config(&config.middleware).clone();

        registry.register("request_id", || {
            let filter: Box<dyn Filter<T>> = Box::new(RequestIdFilter::new());
            Ok(filter)
        });

        let prefixes = config.propagation_prefixes.clone();
        let caller = config.service.app_name.clone();
        registry.register("metadata", move || {
            let filter: Box<dyn Filter<T>> = match side {
                Side::Server => Box::new(MetadataFilter::server()),
                Side::Client => Box::new(
                    MetadataFilter::client(prefixes.clone()).with_constant(CALLER_SERVICE, caller.clone()),
                ),
            };
            Ok(filter)
        });

        let trace = settings.trace;
        registry.register("trace", move || {
            let filter: Box<dyn Filter<T>> = Box::new(TraceFilter::new(side, trace.clone())?);
            Ok(filter)
        });

        let logging = settings.logging;
        registry.register("logging", move || {
            let filter: Box<dyn Filter<T>> = Box::new(LoggingFilter::new(side, logging.clone(), logger.clone())?);
            Ok(filter)
        });

        registry
    }
}

impl<T> Default for FilterRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FilterRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry").field("names", &names).finish()
    }
}

//! Error types.
//!
//! Two families live here and they never mix:
//!
//! - [`Error`] surfaces construction and configuration failures. These are
//!   raised while a pipeline, tracer or filter is being built, never while a
//!   request is in flight.
//! - [`HandlerError`] is what flows out of a failing final handler or filter.
//!   Filters record it as a business result on the [`Context`](crate::Context)
//!   and hand the very same value back to their caller.

use std::fmt;

use thiserror::Error;

use crate::context::{BIZ_CODE_SUCCESS, BIZ_CODE_UNCLASSIFIED};

/// Result alias for fallible construction.
pub type Result<T> = std::result::Result<T, Error>;

/// What a filter chain produces: the final handler's value or the original failure.
pub type Outcome<T> = std::result::Result<T, HandlerError>;

/// Construction-time failures.
#[derive(Debug, Error)]
pub enum Error {
    /// A filter name in a pipeline definition is not registered.
    #[error("middleware `{0}` must implement Filter")]
    InvalidMiddleware(String),

    /// Sampler kind or rate cannot be turned into a sampler.
    #[error("invalid sampler: {0}")]
    InvalidSampler(String),

    /// The tracing driver named in configuration does not exist.
    #[error("unknown tracing driver `{0}`")]
    InvalidDriver(String),

    /// The span reporter named in configuration does not exist.
    #[error("unknown span reporter `{0}`")]
    InvalidReporter(String),

    /// An excluded-path glob failed to compile.
    #[error("invalid path glob `{pattern}`")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failures while reading configuration from the environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// A failure raised by a final handler or a filter.
///
/// Carries an application-level code the same way an exception code would:
/// anything above `1000` is a caller-defined failure category, everything else
/// is reported as `1004` (unclassified) once converted into a business result.
pub struct HandlerError {
    code: i64,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HandlerError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), source: None }
    }

    /// Wraps an arbitrary error as an unclassified failure.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self { code: 0, message: err.to_string(), source: Some(Box::new(err)) }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source<E>(mut self, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(err));
        self
    }

    /// The raw code the failure was raised with.
    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The business code this failure is recorded as.
    pub fn biz_code(&self) -> i64 {
        if self.code > BIZ_CODE_SUCCESS { self.code } else { BIZ_CODE_UNCLASSIFIED }
    }

    /// `(code, message)` pair for [`Context::set_biz_result`](crate::Context::set_biz_result).
    pub fn to_biz_result(&self) -> (i64, String) {
        (self.biz_code(), self.message.clone())
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self::from_error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn caller_defined_codes_survive_conversion() {
        let err = HandlerError::new(1200, "quota exceeded");
        assert_eq!(err.to_biz_result(), (1200, "quota exceeded".to_owned()));
    }

    #[test]
    fn low_and_success_codes_become_unclassified() {
        assert_eq!(HandlerError::new(0, "boom").biz_code(), 1004);
        assert_eq!(HandlerError::new(500, "boom").biz_code(), 1004);
        assert_eq!(HandlerError::new(1000, "boom").biz_code(), 1004);
    }

    #[test]
    fn wrapped_errors_keep_their_source() {
        let io = std::io::Error::other("connection reset");
        let err = HandlerError::from(io);
        assert_eq!(err.message(), "connection reset");
        assert!(err.source().is_some());
        assert_eq!(err.biz_code(), 1004);
    }

    #[test]
    fn invalid_middleware_names_the_offender() {
        let err = Error::InvalidMiddleware("auth".to_owned());
        assert_eq!(err.to_string(), "middleware `auth` must implement Filter");
    }
}

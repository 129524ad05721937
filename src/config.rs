//! Configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Service identity
//! - `APP_ID` (default: 1000)
//! - `APP_NAME` (default: microservice)
//! - `APP_VERSION` (default: 1.0.0)
//! - `APP_DEPLOY_ENV` (default: test)
//!
//! ## Tracing
//! - `TRACING_DRIVER` - `zipkin` or `null` (default: zipkin)
//! - `ZIPKIN_ENDPOINT` - collector URL handed to the reporter
//! - `ZIPKIN_REPORTER_TYPE` - `log`, `noop` or `memory` (default: log)
//! - `ZIPKIN_128BIT` - 128-bit trace ids (default: false)
//! - `ZIPKIN_MAX_TAG_LEN` - longer tag values are discarded (default: 1048576)
//! - `ZIPKIN_SAMPLER_TYPE` - `always`, `never` or `percentage` (default: always)
//! - `ZIPKIN_SAMPLER` - rate for the percentage sampler (default: 1)
//!
//! ## Middleware
//! Per side (`SERVER`, `CLIENT`), for logging:
//! - `MIDDLEWARE_{SIDE}_LOGGING_DISABLED`
//! - `MIDDLEWARE_{SIDE}_LOGGING_TIME_FORMAT` (default: `%Y-%m-%d %H:%M:%S`)
//! - `MIDDLEWARE_{SIDE}_REQUEST_LATENCY_THRESHOLD` in ms (default: 3000)
//! - `MIDDLEWARE_{SIDE}_LOGGING_ACCESS_LEVEL` - `info` or `debug`
//! - `MIDDLEWARE_{SIDE}_LOGGING_{FIELD}` for every capture field below
//!
//! and for tracing `MIDDLEWARE_{SIDE}_TRACE_DISABLED`,
//! `MIDDLEWARE_{SIDE}_TRACE_LATENCY_THRESHOLD` and
//! `MIDDLEWARE_{SIDE}_TRACE_{FIELD}`.
//!
//! Capture fields: `EXCLUDED_PATHS`, `REQUEST_BODY`, `REQUEST_BODY_MAX_SIZE`,
//! `REQUEST_HEADERS`, `RESPONSE_BODY`, `RESPONSE_BODY_MAX_SIZE`,
//! `RESPONSE_HEADERS`, `ALLOWED_HEADERS`, `SENSITIVE_HEADERS`,
//! `SENSITIVE_INPUT`. Lists are comma-separated.
//!
//! ## Propagation
//! - `METADATA_PROPAGATION_PREFIXES` (default: `x-md-global-`)

use std::str::FromStr;

use crate::error::ConfigError;
use crate::metadata::GLOBAL_PREFIX;
use crate::service::ServiceInfo;

/// Default level of a non-interesting access log line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessLevel {
    #[default]
    Info,
    Debug,
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("expected `info` or `debug`, got `{other}`")),
        }
    }
}

/// What a logging or trace filter records, and when it stays out of the way.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    pub disabled: bool,
    /// Milliseconds above which a call counts as slow.
    pub latency_threshold: f64,
    /// Globs of request paths the filter skips.
    pub excluded_paths: Vec<String>,
    pub request_body: bool,
    pub request_body_max_size: usize,
    pub request_headers: bool,
    pub response_body: bool,
    pub response_body_max_size: usize,
    pub response_headers: bool,
    pub allowed_headers: Vec<String>,
    pub sensitive_headers: Vec<String>,
    pub sensitive_input: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            latency_threshold: 3000.0,
            excluded_paths: Vec::new(),
            request_body: false,
            request_body_max_size: 102_400,
            request_headers: false,
            response_body: false,
            response_body_max_size: 102_400,
            response_headers: false,
            allowed_headers: vec!["*".to_owned()],
            sensitive_headers: Vec::new(),
            sensitive_input: vec!["password".to_owned()],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub capture: CaptureConfig,
    /// `chrono` format string for the `start` field.
    pub time_format: String,
    pub access_level: AccessLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            time_format: "%Y-%m-%d %H:%M:%S".to_owned(),
            access_level: AccessLevel::Info,
        }
    }
}

/// Logging and trace settings for one side of an exchange.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SideConfig {
    pub logging: LoggingConfig,
    pub trace: CaptureConfig,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MiddlewareConfig {
    pub server: SideConfig,
    pub client: SideConfig,
}

/// Sampler selection.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    /// `always`, `never` or `percentage`.
    pub kind: String,
    pub rate: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { kind: "always".to_owned(), rate: 1.0 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ZipkinConfig {
    pub endpoint: String,
    pub reporter: String,
    pub trace_id_128bit: bool,
    pub max_tag_len: usize,
    pub sampler: SamplerConfig,
}

impl Default for ZipkinConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9411/api/v2/spans".to_owned(),
            reporter: "log".to_owned(),
            trace_id_128bit: false,
            max_tag_len: 1_048_576,
            sampler: SamplerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TracingConfig {
    /// `zipkin` or `null`.
    pub driver: String,
    pub zipkin: ZipkinConfig,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { driver: "zipkin".to_owned(), zipkin: ZipkinConfig::default() }
    }
}

/// Everything the filters, tracer and log pipeline need.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservabilityConfig {
    pub service: ServiceInfo,
    pub tracing: TracingConfig,
    pub middleware: MiddlewareConfig,
    /// Metadata key prefixes forwarded to downstream calls.
    pub propagation_prefixes: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service: ServiceInfo::default(),
            tracing: TracingConfig::default(),
            middleware: MiddlewareConfig::default(),
            propagation_prefixes: vec![GLOBAL_PREFIX.to_owned()],
        }
    }
}

impl ObservabilityConfig {
    /// Loads configuration from the process environment.
    ///
    /// Calls `dotenvy::dotenv()` first so a `.env` file, if present, is honoured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` when a number, flag or level does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup. Unset and empty keys take defaults.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = ServiceInfo::default();
        let service = ServiceInfo::new(
            env.parse("APP_ID", defaults.app_id)?,
            &env.string("APP_NAME", &defaults.app_name),
            &env.string("APP_VERSION", &defaults.app_version),
            &env.string("APP_DEPLOY_ENV", &defaults.deploy_env),
        );

        let zipkin_defaults = ZipkinConfig::default();
        let tracing = TracingConfig {
            driver: env.string("TRACING_DRIVER", "zipkin"),
            zipkin: ZipkinConfig {
                endpoint: env.string("ZIPKIN_ENDPOINT", &zipkin_defaults.endpoint),
                reporter: env.string("ZIPKIN_REPORTER_TYPE", &zipkin_defaults.reporter),
                trace_id_128bit: env.flag("ZIPKIN_128BIT", false)?,
                max_tag_len: env.parse("ZIPKIN_MAX_TAG_LEN", zipkin_defaults.max_tag_len)?,
                sampler: SamplerConfig {
                    kind: env.string("ZIPKIN_SAMPLER_TYPE", "always"),
                    rate: env.parse("ZIPKIN_SAMPLER", 1.0)?,
                },
            },
        };

        let middleware = MiddlewareConfig {
            server: SideConfig::from_env(&env, "SERVER")?,
            client: SideConfig::from_env(&env, "CLIENT")?,
        };

        Ok(Self {
            service,
            tracing,
            middleware,
            propagation_prefixes: env.list("METADATA_PROPAGATION_PREFIXES", &[GLOBAL_PREFIX]),
        })
    }
}

impl SideConfig {
    fn from_env(env: &Env<'_>, side: &str) -> Result<Self, ConfigError> {
        let logging_prefix = format!("MIDDLEWARE_{side}_LOGGING");
        let trace_prefix = format!("MIDDLEWARE_{side}_TRACE");

        let mut logging_capture = CaptureConfig::from_env(env, &logging_prefix)?;
        // The logging threshold has its own historical key.
        logging_capture.latency_threshold =
            env.parse(&format!("MIDDLEWARE_{side}_REQUEST_LATENCY_THRESHOLD"), 3000.0)?;

        let logging = LoggingConfig {
            capture: logging_capture,
            time_format: env.string(&format!("{logging_prefix}_TIME_FORMAT"), "%Y-%m-%d %H:%M:%S"),
            access_level: env.parse(&format!("{logging_prefix}_ACCESS_LEVEL"), AccessLevel::Info)?,
        };

        let mut trace = CaptureConfig::from_env(env, &trace_prefix)?;
        trace.latency_threshold = env.parse(&format!("{trace_prefix}_LATENCY_THRESHOLD"), 3000.0)?;

        Ok(Self { logging, trace })
    }
}

impl CaptureConfig {
    fn from_env(env: &Env<'_>, prefix: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        let key = |field: &str| format!("{prefix}_{field}");
        Ok(Self {
            disabled: env.flag(&key("DISABLED"), d.disabled)?,
            latency_threshold: d.latency_threshold,
            excluded_paths: env.list(&key("EXCLUDED_PATHS"), &[]),
            request_body: env.flag(&key("REQUEST_BODY"), d.request_body)?,
            request_body_max_size: env.parse(&key("REQUEST_BODY_MAX_SIZE"), d.request_body_max_size)?,
            request_headers: env.flag(&key("REQUEST_HEADERS"), d.request_headers)?,
            response_body: env.flag(&key("RESPONSE_BODY"), d.response_body)?,
            response_body_max_size: env.parse(&key("RESPONSE_BODY_MAX_SIZE"), d.response_body_max_size)?,
            response_headers: env.flag(&key("RESPONSE_HEADERS"), d.response_headers)?,
            allowed_headers: env.list(&key("ALLOWED_HEADERS"), &["*"]),
            sensitive_headers: env.list(&key("SENSITIVE_HEADERS"), &[]),
            sensitive_input: env.list(&key("SENSITIVE_INPUT"), &["password"]),
        })
    }
}

// ── Lookup helpers ────────────────────────────────────────────────────────────

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_owned())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_owned(), e.to_string())),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.get(key) else { return Ok(default) };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnvVar(key.to_owned(), format!("`{raw}` is not a boolean"))),
        }
    }

    fn list(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.get(key) {
            Some(raw) => raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect(),
            None => default.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ObservabilityConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        ObservabilityConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, ObservabilityConfig::default());
        assert_eq!(config.middleware.server.logging.capture.latency_threshold, 3000.0);
        assert_eq!(config.middleware.client.trace.request_body_max_size, 102_400);
    }

    #[test]
    fn reads_side_specific_keys() {
        let config = load(&[
            ("APP_NAME", "ms.order"),
            ("MIDDLEWARE_SERVER_LOGGING_EXCLUDED_PATHS", "/health, /metrics ,"),
            ("MIDDLEWARE_SERVER_REQUEST_LATENCY_THRESHOLD", "250"),
            ("MIDDLEWARE_SERVER_LOGGING_ACCESS_LEVEL", "DEBUG"),
            ("MIDDLEWARE_CLIENT_TRACE_REQUEST_HEADERS", "true"),
            ("MIDDLEWARE_CLIENT_TRACE_LATENCY_THRESHOLD", "10"),
        ])
        .unwrap();

        let server = &config.middleware.server.logging;
        assert_eq!(config.service.app_name, "order");
        assert_eq!(server.capture.excluded_paths, ["/health", "/metrics"]);
        assert_eq!(server.capture.latency_threshold, 250.0);
        assert_eq!(server.access_level, AccessLevel::Debug);
        assert!(config.middleware.client.trace.request_headers);
        assert_eq!(config.middleware.client.trace.latency_threshold, 10.0);
        assert!(!config.middleware.server.trace.request_headers);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = load(&[("ZIPKIN_MAX_TAG_LEN", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref k, _) if k == "ZIPKIN_MAX_TAG_LEN"));

        let err = load(&[("MIDDLEWARE_CLIENT_LOGGING_DISABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref k, _) if k == "MIDDLEWARE_CLIENT_LOGGING_DISABLED"));
    }

    #[test]
    fn reporter_keys_without_a_consumer_are_not_read() {
        let config = load(&[("ZIPKIN_REQUEST_TIMEOUT", "soon"), ("ZIPKIN_ENDPOINT", "http://zipkin:9411")]).unwrap();
        assert_eq!(config.tracing.zipkin.endpoint, "http://zipkin:9411");
    }
}

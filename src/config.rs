//! Configuration module

use std::env;
use std::time::Duration;

use crate::constants::*;
use crate::discovery::CheckProtocol;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name registered with discovery and used as the health registry key
    pub service_name: String,

    /// Server port (0 lets the OS pick one)
    pub port: u16,

    /// Address other services use to reach this instance
    pub advertise_host: String,

    /// Path to the ONNX model file
    pub model_path: String,

    /// Consul agent
    pub consul_host: String,
    pub consul_port: u16,
    pub consul_token: Option<String>,

    /// OTLP collector endpoint, `None` disables the exporter
    pub tracing_endpoint: Option<String>,

    /// How Consul probes this instance
    pub check_protocol: CheckProtocol,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub deregister_after: Duration,

    /// Registration retry budget
    pub register_max_attempts: u32,
    pub register_retry_delay: Duration,

    /// Bounded waits at shutdown
    pub drain_timeout: Duration,
    pub tracing_flush_timeout: Duration,

    /// Per-request scoring timeout, `None` = unbounded
    pub predict_timeout: Option<Duration>,

    /// Emit JSON log lines instead of plain text
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            port: DEFAULT_PORT,
            advertise_host: "localhost".to_string(),
            model_path: DEFAULT_MODEL_PATH.to_string(),
            consul_host: DEFAULT_CONSUL_HOST.to_string(),
            consul_port: DEFAULT_CONSUL_PORT,
            consul_token: None,
            tracing_endpoint: Some(normalize_endpoint(DEFAULT_TRACING_ENDPOINT)),
            check_protocol: CheckProtocol::Http,
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            check_timeout: Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS),
            deregister_after: Duration::from_secs(DEFAULT_DEREGISTER_AFTER_SECS),
            register_max_attempts: DEFAULT_REGISTER_MAX_ATTEMPTS,
            register_retry_delay: Duration::from_secs(DEFAULT_REGISTER_RETRY_DELAY_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            tracing_flush_timeout: Duration::from_secs(DEFAULT_TRACING_FLUSH_TIMEOUT_SECS),
            predict_timeout: Some(Duration::from_millis(DEFAULT_PREDICT_TIMEOUT_MS)),
            json_logs: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_u64 = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| -> bool {
            lookup(key)
                .map(|s| s.to_lowercase() != "false" && s != "0")
                .unwrap_or(default)
        };

        let tracing_endpoint = if flag("TRACING_ENABLED", true) {
            let raw = lookup("JAEGER_ADDR").unwrap_or_else(|| DEFAULT_TRACING_ENDPOINT.to_string());
            Some(normalize_endpoint(&raw)).filter(|e| !e.is_empty())
        } else {
            None
        };

        let predict_timeout_ms = parse_u64("PREDICT_TIMEOUT_MS", DEFAULT_PREDICT_TIMEOUT_MS);

        Self {
            service_name: lookup("SERVICE_NAME")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.service_name),

            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),

            advertise_host: lookup("HOSTNAME")
                .filter(|s| !s.is_empty())
                .or_else(system_hostname)
                .unwrap_or(defaults.advertise_host),

            model_path: lookup("MODEL_PATH").unwrap_or(defaults.model_path),

            consul_host: lookup("CONSUL_HOST").unwrap_or(defaults.consul_host),

            consul_port: lookup("CONSUL_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.consul_port),

            consul_token: lookup("CONSUL_TOKEN").filter(|t| !t.is_empty()),

            tracing_endpoint,

            check_protocol: lookup("HEALTH_CHECK_PROTOCOL")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.check_protocol),

            register_max_attempts: lookup("REGISTER_MAX_ATTEMPTS")
                .and_then(|n| n.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.register_max_attempts),

            register_retry_delay: Duration::from_secs(parse_u64(
                "REGISTER_RETRY_DELAY_SECS",
                DEFAULT_REGISTER_RETRY_DELAY_SECS,
            )),

            drain_timeout: Duration::from_secs(parse_u64(
                "DRAIN_TIMEOUT_SECS",
                DEFAULT_DRAIN_TIMEOUT_SECS,
            )),

            tracing_flush_timeout: Duration::from_secs(parse_u64(
                "TRACING_FLUSH_TIMEOUT_SECS",
                DEFAULT_TRACING_FLUSH_TIMEOUT_SECS,
            )),

            predict_timeout: (predict_timeout_ms > 0)
                .then(|| Duration::from_millis(predict_timeout_ms)),

            json_logs: lookup("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            ..defaults
        }
    }

    /// Base URL of the Consul agent HTTP API
    pub fn consul_url(&self) -> String {
        format!("http://{}:{}", self.consul_host, self.consul_port)
    }
}

/// The OTLP gRPC exporter needs a scheme
fn normalize_endpoint(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}

fn system_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}

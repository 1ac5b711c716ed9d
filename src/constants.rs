//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! `Config::from_env` falls back to these when a variable is unset or unparseable.

/// Name this instance registers under
pub const DEFAULT_SERVICE_NAME: &str = "inference-service";

/// Listen port for the request server
pub const DEFAULT_PORT: u16 = 5000;

/// ONNX export of the trained isolation forest
pub const DEFAULT_MODEL_PATH: &str = "models/isolation_forest_model.onnx";

/// Number of features the model was trained on (NSL-KDD columns minus label/difficulty)
pub const FEATURE_COUNT: usize = 41;

/// Consul agent location
pub const DEFAULT_CONSUL_HOST: &str = "consul";
pub const DEFAULT_CONSUL_PORT: u16 = 8500;

/// OTLP collector (Jaeger) gRPC endpoint
pub const DEFAULT_TRACING_ENDPOINT: &str = "localhost:4317";

/// Discovery health check cadence (seconds)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_DEREGISTER_AFTER_SECS: u64 = 60;

/// Registration retry budget
pub const DEFAULT_REGISTER_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_REGISTER_RETRY_DELAY_SECS: u64 = 3;

/// Bounded waits during shutdown (seconds)
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_TRACING_FLUSH_TIMEOUT_SECS: u64 = 5;

/// Per-request scoring timeout (milliseconds, 0 = unbounded)
pub const DEFAULT_PREDICT_TIMEOUT_MS: u64 = 5000;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

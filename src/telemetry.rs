//! Tracing pipeline: OTLP span exporter + batch processor
//!
//! One pipeline per process. `Telemetry::init` installs it on first call and
//! hands back the same handle afterwards; the handle is passed explicitly to
//! the request server so tests can run with `Telemetry::disabled()`.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{Sampler, Tracer, TracerProvider},
    Resource,
};

/// Export timeout for a single batch
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static PIPELINE: OnceCell<Telemetry> = OnceCell::new();

struct Pipeline {
    provider: TracerProvider,
    tracer: Tracer,
    endpoint: String,
}

/// Handle to the process tracing pipeline (cheap to clone)
#[derive(Clone, Default)]
pub struct Telemetry {
    inner: Option<Arc<Pipeline>>,
}

impl Telemetry {
    /// No exporter; spans are never created
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Install the process-wide pipeline, or return the one already installed.
    ///
    /// Never fails: a broken exporter configuration is logged and yields a
    /// disabled handle. The collector connection is lazy, so an unreachable
    /// endpoint does not delay startup. Must be called inside a tokio runtime.
    pub fn init(service_name: &str, endpoint: Option<&str>) -> Self {
        let Some(endpoint) = endpoint else {
            tracing::info!("Tracing exporter disabled");
            return Self::disabled();
        };

        let result = PIPELINE.get_or_try_init(|| build_pipeline(service_name, endpoint));
        match result {
            Ok(telemetry) => {
                if let Some(existing) = telemetry.endpoint() {
                    if existing != endpoint {
                        tracing::debug!(existing, requested = endpoint, "Tracing pipeline already installed");
                    }
                }
                telemetry.clone()
            }
            Err(e) => {
                tracing::warn!("Tracing init failed: {} - continuing without span export", e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn tracer(&self) -> Option<&Tracer> {
        self.inner.as_ref().map(|p| &p.tracer)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.inner.as_ref().map(|p| p.endpoint.as_str())
    }

    /// Flush buffered spans and stop the exporter, waiting at most `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        let Some(pipeline) = self.inner.clone() else {
            return;
        };

        let flush = tokio::task::spawn_blocking(move || pipeline.provider.shutdown());
        match tokio::time::timeout(timeout, flush).await {
            Ok(Ok(Ok(()))) => tracing::info!("Tracing pipeline flushed and shut down"),
            Ok(Ok(Err(e))) => tracing::warn!("Tracing shutdown error: {}", e),
            Ok(Err(e)) => tracing::warn!("Tracing shutdown task failed: {}", e),
            Err(_) => tracing::warn!(
                "Tracing flush did not finish within {:?}, dropping buffered spans",
                timeout
            ),
        }
    }
}

fn build_pipeline(service_name: &str, endpoint: &str) -> Result<Telemetry, String> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build();

    let tracer = provider.tracer(service_name.to_string());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    tracing::info!(
        "Tracer provider initialized for service '{}', exporting to {}",
        service_name,
        endpoint
    );

    Ok(Telemetry {
        inner: Some(Arc::new(Pipeline {
            provider,
            tracer,
            endpoint: endpoint.to_string(),
        })),
    })
}

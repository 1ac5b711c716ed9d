//! Inference service entry point

use std::process::ExitCode;

use inference_service::{
    config::Config,
    constants::APP_VERSION,
    discovery::ConsulBackend,
    lifecycle::{self, Coordinator},
    model::{OnnxModel, ScoringModel},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "inference_service=info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(config.json_logs.then(|| fmt::layer().json()))
        .with((!config.json_logs).then(|| fmt::layer()))
        .init();

    tracing::info!("Inference Service v{} starting...", APP_VERSION);
    tracing::info!("Consul: {}", config.consul_url());

    let backend = match ConsulBackend::new(&config.consul_url(), config.consul_token.clone()) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!("Failed to create discovery backend: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (trigger, shutdown) = lifecycle::shutdown_channel();
    lifecycle::spawn_signal_listener(trigger);

    let model_path = config.model_path.clone();
    let load_model = move || {
        OnnxModel::load(&model_path).map(|model| Box::new(model) as Box<dyn ScoringModel>)
    };

    match Coordinator::new(config, backend).run(load_model, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Inference service failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

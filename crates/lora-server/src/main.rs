use clap::Parser;
use lora_engine::ModelRuntime;
use lora_runtime::{probe_accelerators, MockRuntime};
use lora_server::{run_server, AppState, Cli};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.into_config()?;

    let runtime = Arc::new(MockRuntime::new().with_accelerators(probe_accelerators()));
    tracing::info!(
        runtime = runtime.name(),
        base_model = %config.model.base_model,
        adapter = %config.model.lora_adapter.display(),
        device = %config.model.device,
        "starting lora-serve"
    );

    let state = AppState::new(runtime, config.clone());

    if config.preload {
        match state.session.load().await {
            Ok(_) => tracing::info!("model preloaded"),
            Err(err) => {
                tracing::error!(error = %err, "preload failed, the next request will retry")
            }
        }
    }

    run_server(state, config.bind_addr).await
}

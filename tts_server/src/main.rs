use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tts_core::{KokoroModel, TtsManager, VoiceStore};
use tts_server::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting TTS server...");

    let config = ServerConfig::from_env();
    config.validate()?;

    info!("Loading voices from {}", config.voices_dir.display());
    let voices = VoiceStore::load_dir(&config.voices_dir)?;
    info!("Loaded {} voices: {:?}", voices.len(), voices.list());

    info!("Loading model from {}", config.model_path.display());
    let intra_threads = (num_cpus() / config.synth_workers).max(1);
    let mut model = KokoroModel::load(&config.model_path, &config.model_config_path, intra_threads)
        .with_context(|| format!("failed to load model {}", config.model_path.display()))?;
    if let Some(sample_rate) = config.sample_rate {
        model = model.with_sample_rate(sample_rate);
    }

    let tts = TtsManager::new(voices, Arc::new(model), config.tts_options())?;
    info!(
        "Server configuration loaded: port={}, workers={}, max_text_length={}, rate_limit={}/min",
        config.port, config.synth_workers, config.max_text_length, config.rate_limit_per_minute
    );

    let port = config.port;
    let state = AppState::new(tts, config);
    let app = build_router(state)?;

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

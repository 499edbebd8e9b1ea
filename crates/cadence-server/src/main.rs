//! Cadence Server - HTTP host for streamed, gapless speech

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod settings;
mod state;

use cadence_core::{
    AudioOutput, ChunkOrchestrator, ClockOutput, CredentialPool, GeminiBackend,
    ResponseGenerator, SpeechClient, SynthesisBackend,
};
use settings::{OutputKind, Settings};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_server=debug,cadence_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cadence speech server");

    // Load configuration
    let settings = settings::load()?;
    info!(
        "Speech model: {}, voice: {}",
        settings.speech.speech_model, settings.speech.voice_name
    );

    let pool = Arc::new(CredentialPool::new(&settings.credentials.api_keys)?);
    let backend: Arc<dyn SynthesisBackend> = Arc::new(GeminiBackend::new(&settings.speech)?);
    let output = open_output(&settings)?;

    let client = SpeechClient::new(Arc::clone(&backend), Arc::clone(&pool), &settings.speech);
    let orchestrator = ChunkOrchestrator::new(client, &settings.speech);
    let generator = ResponseGenerator::new(backend, pool, &settings.speech);
    let state = AppState::new(orchestrator, generator, output, &settings.speech);

    // Build router
    let app = api::create_router(state, &settings.server);

    // Start server
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn open_output(settings: &Settings) -> anyhow::Result<Arc<dyn AudioOutput>> {
    match settings.audio.output {
        OutputKind::Clock => {
            info!("Using silent wall-clock audio output");
            Ok(Arc::new(ClockOutput::new()))
        }
        #[cfg(feature = "device")]
        OutputKind::Device => {
            let output = cadence_core::DeviceOutput::open_default(settings.speech.sample_rate)?;
            info!("Using audio device at {} Hz", output.device_rate());
            Ok(Arc::new(output))
        }
        #[cfg(not(feature = "device"))]
        OutputKind::Device => {
            anyhow::bail!("audio.output = \"device\" needs a build with the `device` feature")
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

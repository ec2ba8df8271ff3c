//! Lector Server - HTTP API for chunked document narration

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod error;
mod state;

use lector_core::{DocumentExtractor, JobSupervisor, OpenAiSpeechClient, Settings};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lector_server=debug,lector_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Lector Server");

    // Load configuration
    let settings = Settings::load(None)?;
    info!("Configuration: {:?}", settings.redacted());

    // Create pipeline
    let synthesizer = OpenAiSpeechClient::new(&settings.synthesis, settings.pipeline.audio_format)?;
    let supervisor = JobSupervisor::new(settings.pipeline.clone(), Arc::new(synthesizer))?;
    let state = AppState::new(supervisor, DocumentExtractor::new());

    // Build router
    let app = api::create_router(state, &settings.server);

    // Start server
    let addr = settings.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

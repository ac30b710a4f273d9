// Finance ML Service - Web Server
// REST API with Axum: merchant, category, anomaly, batch detection

use anyhow::{Context, Result};
use finance_ml::api::{router, AppState};
use finance_ml::{logging, Detectors, Settings};
use tracing::info;

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    logging::init(&settings.log_level, settings.log_format)?;

    info!(
        service = %settings.service_name,
        version = %settings.service_version,
        provider = %settings.llm_provider,
        model = settings.active_model(),
        llm_available = settings.llm_available(),
        "service_starting"
    );

    let detectors = Detectors::from_settings(&settings)?;

    let addr = format!("{}:{}", settings.host, settings.port);
    let app = router(AppState::new(detectors, settings));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(address = %addr, "service_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("service_stopping");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "shutdown_signal_error");
    }
}

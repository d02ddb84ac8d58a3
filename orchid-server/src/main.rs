use anyhow::{Context, Result};
use orchid_core::domain::setup::Setup;
use orchid_engine::{EngineConfig, LocalDispatcher};
use orchid_server::api::{self, AppState};
use orchid_server::config::ServerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "orchid_server=info,orchid_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Orchid Server...");

    let engine_config = EngineConfig::from_env();
    engine_config
        .validate()
        .context("Invalid engine configuration")?;

    let server_config = ServerConfig::from_env(&engine_config.root)?;
    server_config
        .validate()
        .context("Invalid server configuration")?;

    tracing::info!("Loading setup from {}", engine_config.root.display());

    let setup = Setup::load(&engine_config.root).context("Failed to load setup")?;

    tracing::info!(
        "Loaded {} job(s), {} machine(s), {} script(s)",
        setup.jobs.len(),
        setup.machines.len(),
        setup.scripts.len()
    );

    let dispatcher = LocalDispatcher::open(engine_config, setup)
        .await
        .context("Failed to open execution store")?;

    if server_config.secret.is_none() {
        tracing::warn!("No secret configured; the API is open to anyone who can reach it");
    }

    // Build router with all API endpoints
    let app = api::create_router(AppState::new(dispatcher.clone(), server_config.secret));

    tracing::info!("Listening on {}", server_config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&server_config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", server_config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");

    Ok(())
}

/// Resolves on Ctrl-C once running executions have been cancelled and sealed,
/// so open output streams end before the server drains its connections
async fn shutdown_signal(dispatcher: LocalDispatcher) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!(
        "Shutting down, cancelling {} running execution(s)...",
        dispatcher.running().len()
    );
    dispatcher.shutdown().await;
}

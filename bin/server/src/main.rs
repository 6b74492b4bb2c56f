use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypoint_server::{app, config::WaypointConfig, error::StartupError, routes};
use waypoint_workflow::{PluginRegistry, WorkflowDefinition};

#[tokio::main]
async fn main() -> Result<(), Report<StartupError>> {
    let config = WaypointConfig::load().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        storage = %config.storage_type,
        definition = %config.definition_path.display(),
        "loaded configuration"
    );

    let definition = WorkflowDefinition::from_path(&config.definition_path).map_err(|e| {
        StartupError::Definition {
            details: e.to_string(),
        }
    })?;

    let plugins = PluginRegistry::new();
    let state = Arc::new(app::build_state(&config, &definition, &plugins).await?);
    let router = routes::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| StartupError::Bind {
            address: config.bind_address.clone(),
            details: e.to_string(),
        })?;

    info!("listening on http://{}", config.bind_address);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;

    let cancelled = state.manager.cancel_all_timers();
    info!(cancelled, "shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

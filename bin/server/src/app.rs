//! Wiring of the workflow manager from configuration.

use crate::config::WaypointConfig;
use crate::error::StartupError;
use crate::i18n::Catalog;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{info, warn};
use waypoint_integration::HttpWebhookSink;
use waypoint_workflow::store::connect_backend;
use waypoint_workflow::{
    Event, Notifier, PluginRegistry, StateStore, WorkflowDefinition, WorkflowManager,
    WorkflowMonitor,
};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub manager: WorkflowManager,
    pub monitor: Arc<WorkflowMonitor>,
    pub catalog: Catalog,
}

/// Registers the rules every workflow can use.
pub fn register_builtin_rules(manager: &WorkflowManager) {
    manager.add_rule("always", || true);
    manager.add_rule("never", || false);
}

fn logging_event(name: &str) -> Event {
    Event::new(name, |notification| {
        info!(?notification, "workflow event fired");
        Ok(())
    })
}

/// Builds a manager for `definition` and restores its persisted state.
///
/// # Errors
///
/// Returns [`StartupError`] if the definition is invalid, storage or the
/// webhook cannot be set up, or a plugin fails.
pub async fn build_state(
    config: &WaypointConfig,
    definition: &WorkflowDefinition,
    plugins: &PluginRegistry,
) -> Result<AppState, Report<StartupError>> {
    let graph = definition
        .build_graph_with(logging_event)
        .map_err(|e| StartupError::Definition {
            details: e.to_string(),
        })?;

    let backend = connect_backend(config.storage_type, &config.storage_config)
        .await
        .map_err(|e| StartupError::Storage {
            details: e.to_string(),
        })?;

    let monitor = Arc::new(WorkflowMonitor::new());
    let mut notifier = Notifier::new().with_observer(monitor.clone());
    if let Some(url) = &config.webhook_url {
        let sink = HttpWebhookSink::with_timeout(url, config.webhook_timeout()).map_err(|e| {
            StartupError::Webhook {
                details: e.to_string(),
            }
        })?;
        info!(%url, "webhook enabled");
        notifier = notifier.with_webhook(Arc::new(sink));
    }

    let manager = WorkflowManager::builder()
        .graph(graph)
        .version(definition.version.clone())
        .notifier(notifier)
        .store(StateStore::new(backend))
        .persist_policy(config.persist_policy())
        .build();

    register_builtin_rules(&manager);
    plugins
        .install_all(&manager)
        .map_err(|e| StartupError::Plugin {
            details: e.to_string(),
        })?;

    for edge in manager.transitions() {
        if !manager.rules().has_rule(&edge.condition) {
            warn!(from = %edge.from, to = %edge.to, rule = %edge.condition, "transition names an unregistered rule");
        }
    }

    match manager.restore().await {
        Ok(Some(change)) => info!(state = %change.to, "restored persisted state"),
        Ok(None) => {}
        Err(e) => {
            return Err(StartupError::Storage {
                details: e.to_string(),
            }
            .into());
        }
    }

    info!(
        version = %manager.version(),
        state = manager.current_state().as_deref().unwrap_or("-"),
        "workflow ready"
    );

    Ok(AppState {
        manager,
        monitor,
        catalog: Catalog::new(config.default_locale.clone()),
    })
}

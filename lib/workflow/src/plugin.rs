//! Startup extension points.
//!
//! A plugin gets the manager once, before the workflow starts taking
//! requests, and may register rules, listeners, events, or states.

use crate::manager::WorkflowManager;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// A plugin failed to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginError {
    pub plugin: String,
    pub reason: String,
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}' failed to install: {}", self.plugin, self.reason)
    }
}

impl std::error::Error for PluginError {}

/// An extension installed into a workflow at startup.
pub trait Plugin: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Installs the plugin.
    ///
    /// # Errors
    ///
    /// Returns a reason string if installation fails.
    fn install(&self, manager: &WorkflowManager) -> Result<(), String>;
}

/// Ordered list of plugins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin. Plugins install in registration order.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    /// Installs every plugin into `manager`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] naming the plugin that failed.
    pub fn install_all(&self, manager: &WorkflowManager) -> waypoint_core::Result<(), PluginError> {
        for plugin in &self.plugins {
            plugin.install(manager).map_err(|reason| PluginError {
                plugin: plugin.name().to_string(),
                reason,
            })?;
            info!(plugin = plugin.name(), "plugin installed");
        }
        Ok(())
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

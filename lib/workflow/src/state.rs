//! Workflow states.

use serde::{Deserialize, Serialize};

/// A named state in the workflow graph.
///
/// Only the engine flips `is_active`; at most one state in a graph is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Unique name within the workflow.
    pub name: String,
    /// Whether this is the current state.
    #[serde(default)]
    pub is_active: bool,
}

impl State {
    /// Creates an inactive state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_active: false,
        }
    }

    pub(crate) fn activate(&mut self) {
        self.is_active = true;
    }

    pub(crate) fn deactivate(&mut self) {
        self.is_active = false;
    }
}

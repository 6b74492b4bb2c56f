//! Static workflow definitions.
//!
//! A definition is loaded once at startup from JSON:
//!
//! ```json
//! { "version": "1.0.0",
//!   "states": [{"name": "initial"}, {"name": "in_progress"}],
//!   "transitions": [{"from": "initial", "to": "in_progress", "condition": "always"}],
//!   "events": [{"name": "transitionToin_progress"}] }
//! ```
//!
//! Events in a file carry only a name; callbacks are attached when the graph
//! is built.

use crate::edge::Edge;
use crate::error::DefinitionError;
use crate::event::Event;
use crate::graph::WorkflowGraph;
use crate::state::State;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Version assumed when a definition omits one.
pub const DEFAULT_VERSION: &str = "1.0.0";

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// A named event as it appears in a definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub name: String,
}

/// A workflow definition as read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Opaque version string, persisted next to the current state.
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub states: Vec<State>,
    #[serde(default)]
    pub transitions: Vec<Edge>,
    #[serde(default)]
    pub events: Vec<EventDefinition>,
}

impl Default for WorkflowDefinition {
    fn default() -> Self {
        Self {
            version: default_version(),
            states: Vec::new(),
            transitions: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Non-fatal findings from [`WorkflowDefinition::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionWarning {
    /// A transition names a state the definition does not declare. Taking it
    /// fails at runtime with `UnknownState`.
    DanglingTransition { from: String, to: String },
}

impl fmt::Display for DefinitionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingTransition { from, to } => {
                write!(f, "transition {from} -> {to} references an undeclared state")
            }
        }
    }
}

impl WorkflowDefinition {
    /// Parses a definition from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Parse`] if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse {
            reason: e.to_string(),
        })
    }

    /// Reads and parses a definition file.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Io`] if the file cannot be read and
    /// [`DefinitionError::Parse`] if it is not a valid definition.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| DefinitionError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    /// Checks the definition.
    ///
    /// Duplicate state names are rejected. Transitions that reference
    /// undeclared states are returned as warnings.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::DuplicateState`] for the first repeated name.
    pub fn validate(&self) -> Result<Vec<DefinitionWarning>, DefinitionError> {
        let mut names = HashSet::with_capacity(self.states.len());
        for state in &self.states {
            if !names.insert(state.name.as_str()) {
                return Err(DefinitionError::DuplicateState {
                    name: state.name.clone(),
                });
            }
        }

        Ok(self
            .transitions
            .iter()
            .filter(|edge| !names.contains(edge.from.as_str()) || !names.contains(edge.to.as_str()))
            .map(|edge| DefinitionWarning::DanglingTransition {
                from: edge.from.clone(),
                to: edge.to.clone(),
            })
            .collect())
    }

    /// Builds a graph, attaching a callback to each named event with
    /// `make_event`. The first declared state becomes active.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::DuplicateState`] if validation fails.
    pub fn build_graph_with<F>(&self, mut make_event: F) -> Result<WorkflowGraph, DefinitionError>
    where
        F: FnMut(&str) -> Event,
    {
        for warning in self.validate()? {
            warn!(%warning, "workflow definition warning");
        }

        let mut graph = WorkflowGraph::new();
        for state in &self.states {
            graph.add_state(State::new(state.name.clone()))?;
        }
        for edge in &self.transitions {
            graph.add_edge(edge.clone());
        }
        for event in &self.events {
            graph.add_event(make_event(&event.name));
        }
        Ok(graph)
    }

    /// Builds a graph whose named events do nothing when fired.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::DuplicateState`] if validation fails.
    pub fn build_graph(&self) -> Result<WorkflowGraph, DefinitionError> {
        self.build_graph_with(|name| Event::new(name, |_| Ok(())))
    }
}

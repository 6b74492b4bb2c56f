//! The workflow graph and its active-state pointers.
//!
//! States, edges, and named events live here together with the `current` and
//! `previous` pointers. The engine keeps one `WorkflowGraph` behind a lock and
//! performs every pointer change as a single call on it, so no reader ever
//! sees zero or two active states.
//!
//! Edges are stored as a list rather than as petgraph edges because an edge
//! may name a target that has no state (that is a runtime `UnknownState`, not
//! a construction error). A petgraph view is built on demand for analysis and
//! DOT output.

use crate::edge::Edge;
use crate::error::{DefinitionError, TransitionError};
use crate::event::Event;
use crate::state::State;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Pointer positions saved before a mutation so it can be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    current: Option<usize>,
    previous: Option<usize>,
}

/// The result of moving the active-state pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PointerMove {
    pub from: Option<String>,
    pub to: String,
    pub checkpoint: Checkpoint,
}

/// States, edges, and events of one workflow instance.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    states: Vec<State>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    events: HashMap<String, Event>,
    current: Option<usize>,
    previous: Option<usize>,
}

impl WorkflowGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state. The first state added becomes the active state.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::DuplicateState`] if the name is taken.
    pub fn add_state(&mut self, state: State) -> Result<(), DefinitionError> {
        if self.index.contains_key(&state.name) {
            return Err(DefinitionError::DuplicateState { name: state.name });
        }

        let position = self.states.len();
        let mut state = state;
        state.is_active = false;
        self.index.insert(state.name.clone(), position);
        self.states.push(state);

        if self.current.is_none() {
            self.states[position].activate();
            self.current = Some(position);
        }
        Ok(())
    }

    /// Adds an edge. Edges are never removed.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Adds a named event, replacing an event with the same name.
    pub fn add_event(&mut self, event: Event) {
        self.events.insert(event.name.clone(), event);
    }

    /// Returns the state named `name`.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|&i| &self.states[i])
    }

    /// Returns all states in insertion order.
    #[must_use]
    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// Returns all edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Returns the named event, if registered.
    #[must_use]
    pub fn event(&self, name: &str) -> Option<&Event> {
        self.events.get(name)
    }

    /// Returns registered event names, sorted.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the active state.
    #[must_use]
    pub fn current(&self) -> Option<&State> {
        self.current.map(|i| &self.states[i])
    }

    /// Returns the state a rollback would return to.
    #[must_use]
    pub fn previous(&self) -> Option<&State> {
        self.previous.map(|i| &self.states[i])
    }

    /// Returns the first edge from `from` to `to`.
    #[must_use]
    pub fn find_edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.connects(from, to))
    }

    /// Returns the edges leaving `from`.
    #[must_use]
    pub fn edges_from(&self, from: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|edge| edge.from == from).collect()
    }

    /// Returns how many states are active. Always 1 once a state exists.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.states.iter().filter(|state| state.is_active).count()
    }

    /// Returns edges whose source or target names no state.
    #[must_use]
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|edge| !self.index.contains_key(&edge.from) || !self.index.contains_key(&edge.to))
            .collect()
    }

    /// Returns states that cannot be reached from the first state.
    #[must_use]
    pub fn unreachable_states(&self) -> Vec<&State> {
        if self.states.is_empty() {
            return Vec::new();
        }
        let graph = self.to_digraph();
        let mut reached = vec![false; self.states.len()];
        let mut dfs = Dfs::new(&graph, NodeIndex::new(0));
        while let Some(node) = dfs.next(&graph) {
            reached[node.index()] = true;
        }
        self.states
            .iter()
            .zip(reached)
            .filter_map(|(state, reached)| (!reached).then_some(state))
            .collect()
    }

    /// Builds a petgraph view: nodes are state names, edge weights are rule
    /// names. Dangling edges are left out.
    #[must_use]
    pub fn to_digraph(&self) -> DiGraph<String, String> {
        let mut graph = DiGraph::with_capacity(self.states.len(), self.edges.len());
        for state in &self.states {
            graph.add_node(state.name.clone());
        }
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (self.index.get(&edge.from), self.index.get(&edge.to)) {
                graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), edge.condition.clone());
            }
        }
        graph
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        format!("{}", petgraph::dot::Dot::new(&self.to_digraph()))
    }

    /// Renders the graph as text: a state list with the active state starred,
    /// then one line per edge. Edges to missing states are marked `?`.
    #[must_use]
    pub fn visualize(&self) -> String {
        let names: Vec<String> = self
            .states
            .iter()
            .map(|state| {
                if state.is_active {
                    format!("{}*", state.name)
                } else {
                    state.name.clone()
                }
            })
            .collect();

        let mut out = format!("states: {}\n", names.join(", "));
        for edge in &self.edges {
            let marker = if self.index.contains_key(&edge.to) { "" } else { "?" };
            let _ = writeln!(out, "{} --[{}]--> {}{marker}", edge.from, edge.condition, edge.to);
        }
        out
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            current: self.current,
            previous: self.previous,
        }
    }

    fn set_active(&mut self, position: Option<usize>) {
        if let Some(old) = self.current {
            self.states[old].deactivate();
        }
        if let Some(new) = position {
            self.states[new].activate();
        }
        self.current = position;
    }

    /// Moves the active pointer from the current state to `target`.
    ///
    /// The current state is recorded as `previous` before the target is
    /// resolved. When the target does not exist nothing else changes, so a
    /// rollback returns to the same state and clears the record.
    pub(crate) fn move_to(&mut self, target: &str) -> Result<PointerMove, TransitionError> {
        let checkpoint = self.checkpoint();
        let current = self.current.ok_or(TransitionError::NoCurrentState)?;
        self.previous = Some(current);

        let Some(&next) = self.index.get(target) else {
            return Err(TransitionError::UnknownState {
                name: target.to_string(),
            });
        };

        self.set_active(Some(next));
        Ok(PointerMove {
            from: Some(self.states[current].name.clone()),
            to: self.states[next].name.clone(),
            checkpoint,
        })
    }

    /// Reactivates the previous state and clears the previous pointer.
    pub(crate) fn move_back(&mut self) -> Result<PointerMove, TransitionError> {
        let checkpoint = self.checkpoint();
        let previous = self.previous.ok_or(TransitionError::NoPreviousState)?;
        let from = self.current().map(|state| state.name.clone());

        self.set_active(Some(previous));
        self.previous = None;
        Ok(PointerMove {
            from,
            to: self.states[previous].name.clone(),
            checkpoint,
        })
    }

    /// Makes `name` active without any edge or guard. Returns `None` if the
    /// state is unknown.
    pub(crate) fn force_active(&mut self, name: &str) -> Option<PointerMove> {
        let checkpoint = self.checkpoint();
        let next = *self.index.get(name)?;
        let from = self.current().map(|state| state.name.clone());
        self.set_active(Some(next));
        self.previous = None;
        Some(PointerMove {
            from,
            to: name.to_string(),
            checkpoint,
        })
    }

    /// Restores the pointers saved in `checkpoint`.
    pub(crate) fn revert(&mut self, checkpoint: Checkpoint) {
        self.set_active(checkpoint.current);
        self.previous = checkpoint.previous;
    }
}

//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `RuleError`: rule engine lookups
//! - `DefinitionError`: loading and validating a workflow definition
//! - `TransitionError`: the transition protocol, returned wrapped in a
//!   `Report` from the public `WorkflowManager` API
//!
//! Storage and listener errors live next to the traits that produce them
//! (`store::StoreError`, `notify::ListenerError`).

use std::fmt;

/// Errors from the rule engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// No predicate is registered under this name.
    NotFound { rule: String },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { rule } => write!(f, "rule not found: {rule}"),
        }
    }
}

impl std::error::Error for RuleError {}

/// Errors from loading a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// The definition file could not be read.
    Io { path: String, reason: String },
    /// The definition is not valid JSON or has the wrong shape.
    Parse { reason: String },
    /// Two states share a name.
    DuplicateState { name: String },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, reason } => {
                write!(f, "failed to read workflow definition '{path}': {reason}")
            }
            Self::Parse { reason } => write!(f, "invalid workflow definition: {reason}"),
            Self::DuplicateState { name } => write!(f, "duplicate state: {name}"),
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Errors from the transition protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The workflow has no states yet, so there is nothing to transition from.
    NoCurrentState,
    /// An edge's condition names a rule that is not registered.
    RuleNotFound { rule: String },
    /// No edge from the current state to the target, or its guard said no.
    InvalidTransition { from: String, to: String },
    /// An edge points at a state that does not exist in the graph.
    UnknownState { name: String },
    /// Rollback requested with nothing to roll back to.
    NoPreviousState,
    /// The new current state could not be persisted.
    StorageFailed { reason: String },
    /// A listener or named event callback failed.
    ListenerFailed { event: String, reason: String },
}

impl TransitionError {
    /// Returns true for failures a client caused by asking for a transition
    /// the graph does not allow.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::UnknownState { .. } | Self::RuleNotFound { .. }
        )
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCurrentState => write!(f, "workflow has no current state"),
            Self::RuleNotFound { rule } => write!(f, "rule not found: {rule}"),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid transition from {from} to {to}")
            }
            Self::UnknownState { name } => write!(f, "unknown state: {name}"),
            Self::NoPreviousState => write!(f, "no previous state to roll back to"),
            Self::StorageFailed { reason } => {
                write!(f, "failed to persist workflow state: {reason}")
            }
            Self::ListenerFailed { event, reason } => {
                write!(f, "listener for '{event}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

impl From<RuleError> for TransitionError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotFound { rule } => Self::RuleNotFound { rule },
        }
    }
}

//! Transition edges.
//!
//! An edge connects two states by name and is guarded by a rule name. The
//! rule is looked up in the rule engine when the edge is evaluated, not when
//! it is added.

use crate::error::RuleError;
use crate::rule::RuleEngine;
use serde::{Deserialize, Serialize};

/// A directed, guarded transition between two named states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source state name.
    pub from: String,
    /// Target state name.
    pub to: String,
    /// Name of the guarding rule.
    pub condition: String,
}

impl Edge {
    /// Creates an edge guarded by `condition`.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: condition.into(),
        }
    }

    /// Returns whether this edge goes from `from` to `to`.
    #[must_use]
    pub fn connects(&self, from: &str, to: &str) -> bool {
        self.from == from && self.to == to
    }

    /// Evaluates the guard through `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NotFound`] if the condition names no rule.
    pub fn guard(&self, rules: &RuleEngine) -> Result<bool, RuleError> {
        rules.evaluate_rule(&self.condition)
    }
}

//! Named guard predicates.
//!
//! Edges refer to rules by name and the name is resolved every time a guard
//! is evaluated, so re-registering a rule changes the behavior of every edge
//! that names it.

use crate::error::RuleError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A zero-argument guard predicate.
pub type Rule = Arc<dyn Fn() -> bool + Send + Sync>;

/// Registry of named guard predicates.
#[derive(Clone, Default)]
pub struct RuleEngine {
    rules: Arc<RwLock<HashMap<String, Rule>>>,
}

impl RuleEngine {
    /// Creates an empty rule engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `predicate` under `name`, replacing any previous rule.
    pub fn add_rule<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(predicate));
    }

    /// Evaluates the rule registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NotFound`] if no rule has that name.
    pub fn evaluate_rule(&self, name: &str) -> Result<bool, RuleError> {
        // Clone the predicate out so it runs without holding the lock; a
        // predicate is free to register rules itself.
        let rule = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RuleError::NotFound {
                rule: name.to_string(),
            })?;
        Ok(rule())
    }

    /// Returns whether a rule is registered under `name`.
    #[must_use]
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Returns the registered rule names, sorted.
    #[must_use]
    pub fn rule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rule_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn evaluates_registered_rule() {
        let rules = RuleEngine::new();
        rules.add_rule("always", || true);
        rules.add_rule("never", || false);

        assert_eq!(rules.evaluate_rule("always"), Ok(true));
        assert_eq!(rules.evaluate_rule("never"), Ok(false));
    }

    #[test]
    fn missing_rule_is_an_error() {
        let rules = RuleEngine::new();
        assert_eq!(
            rules.evaluate_rule("approved"),
            Err(RuleError::NotFound {
                rule: "approved".to_string()
            })
        );
    }

    #[test]
    fn add_rule_overwrites() {
        let rules = RuleEngine::new();
        rules.add_rule("approved", || false);
        rules.add_rule("approved", || true);
        assert_eq!(rules.evaluate_rule("approved"), Ok(true));
        assert_eq!(rules.rule_names(), vec!["approved".to_string()]);
    }

    #[test]
    fn predicate_reads_external_state_at_evaluation_time() {
        let rules = RuleEngine::new();
        let approved = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&approved);
        rules.add_rule("approved", move || flag.load(Ordering::SeqCst));

        assert_eq!(rules.evaluate_rule("approved"), Ok(false));
        approved.store(true, Ordering::SeqCst);
        assert_eq!(rules.evaluate_rule("approved"), Ok(true));
    }

    #[test]
    fn clones_share_registrations() {
        let rules = RuleEngine::new();
        let other = rules.clone();
        other.add_rule("always", || true);
        assert!(rules.has_rule("always"));
    }
}

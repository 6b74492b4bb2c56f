//! The transition engine.
//!
//! [`WorkflowManager`] owns the graph, rule engine, store, timers, and
//! notifier of one workflow instance. Every path that moves the active state
//! (immediate transitions, timer fires, rollback, bootstrap) runs under one
//! async transition gate, so transitions never interleave, including their
//! persistence.
//!
//! An applied transition goes through these steps:
//!
//! 1. find the edge from the current state to the target and evaluate its
//!    guard
//! 2. for a non-zero delay, arm a timer and return
//! 3. record the current state as previous and deactivate it
//! 4. resolve the target state
//! 5. activate the target and persist its name
//! 6. notify observers and listeners, fire the synthetic
//!    `transitionTo<target>` event, and post the webhook
//!
//! Steps 3 to 5 change the graph in one write-locked call. When any step
//! fails the error is reported as `workflowError` and the engine rolls back
//! to the previous state, if there is one.

use crate::edge::Edge;
use crate::error::{DefinitionError, TransitionError};
use crate::event::Event;
use crate::graph::{PointerMove, WorkflowGraph};
use crate::notify::{
    ChangeOrigin, EventBus, ListenerError, Notification, Notifier, ROLLBACK_EVENT,
    STATE_CHANGE_EVENT, StateChange, WORKFLOW_ERROR_EVENT, WebhookPayload, synthetic_event_name,
};
use crate::rule::RuleEngine;
use crate::state::State;
use crate::store::{StateStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use waypoint_core::TimerId;
use waypoint_scheduler::{PendingTimer, ReschedulePolicy, ScheduleOutcome, TimerRegistry};

/// Default number of attempts to persist a state change.
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;

/// Default pause before the second persist attempt; grows linearly.
pub const DEFAULT_PERSIST_BACKOFF: Duration = Duration::from_millis(50);

/// Result of a successful `transition_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied(StateChange),
    /// The transition will be applied when its timer fires.
    Scheduled {
        target: String,
        timer_id: TimerId,
        fires_at: DateTime<Utc>,
    },
}

impl TransitionOutcome {
    /// Returns whether the transition was deferred to a timer.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }
}

/// How hard to try persisting a change before reverting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_PERSIST_ATTEMPTS,
            backoff: DEFAULT_PERSIST_BACKOFF,
        }
    }
}

struct Inner {
    graph: RwLock<WorkflowGraph>,
    rules: RuleEngine,
    notifier: Notifier,
    store: StateStore,
    timers: TimerRegistry,
    gate: tokio::sync::Mutex<()>,
    persist: PersistPolicy,
    version: String,
}

/// Builder for [`WorkflowManager`].
#[derive(Debug, Default)]
pub struct WorkflowManagerBuilder {
    graph: WorkflowGraph,
    rules: Option<RuleEngine>,
    notifier: Option<Notifier>,
    store: Option<StateStore>,
    reschedule: ReschedulePolicy,
    persist: PersistPolicy,
    version: Option<String>,
}

impl WorkflowManagerBuilder {
    /// Starts from `graph` instead of an empty one.
    #[must_use]
    pub fn graph(mut self, graph: WorkflowGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Uses a shared rule engine.
    #[must_use]
    pub fn rules(mut self, rules: RuleEngine) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Uses `notifier` for observers, listeners, and the webhook.
    #[must_use]
    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Persists through `store`. Defaults to memory.
    #[must_use]
    pub fn store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets what happens when a delayed transition is requested for a target
    /// that already has one pending.
    #[must_use]
    pub fn reschedule_policy(mut self, policy: ReschedulePolicy) -> Self {
        self.reschedule = policy;
        self
    }

    /// Sets persistence retries. `attempts` below 1 is treated as 1.
    #[must_use]
    pub fn persist_policy(mut self, policy: PersistPolicy) -> Self {
        self.persist = policy;
        self
    }

    /// Sets the workflow version string.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn build(self) -> WorkflowManager {
        let persist = PersistPolicy {
            attempts: self.persist.attempts.max(1),
            backoff: self.persist.backoff,
        };
        WorkflowManager {
            inner: Arc::new(Inner {
                graph: RwLock::new(self.graph),
                rules: self.rules.unwrap_or_default(),
                notifier: self.notifier.unwrap_or_default(),
                store: self.store.unwrap_or_else(StateStore::in_memory),
                timers: TimerRegistry::with_policy(self.reschedule),
                gate: tokio::sync::Mutex::new(()),
                persist,
                version: self
                    .version
                    .unwrap_or_else(|| crate::definition::DEFAULT_VERSION.to_string()),
            }),
        }
    }
}

/// A running workflow instance. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkflowManager {
    inner: Arc<Inner>,
}

impl WorkflowManager {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> WorkflowManagerBuilder {
        WorkflowManagerBuilder::default()
    }

    /// Creates an empty workflow with in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    fn read_graph(&self) -> RwLockReadGuard<'_, WorkflowGraph> {
        self.inner.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_graph(&self) -> RwLockWriteGuard<'_, WorkflowGraph> {
        self.inner.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    // Construction

    /// Adds a state. The first state added becomes active.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::DuplicateState`] if the name is taken.
    pub fn add_state(&self, state: State) -> waypoint_core::Result<(), DefinitionError> {
        self.write_graph().add_state(state)?;
        Ok(())
    }

    /// Adds a guarded edge.
    pub fn add_transition(&self, edge: Edge) {
        self.write_graph().add_edge(edge);
    }

    /// Adds a named event.
    pub fn add_event(&self, event: Event) {
        self.write_graph().add_event(event);
    }

    /// Registers a guard rule.
    pub fn add_rule<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.inner.rules.add_rule(name, predicate);
    }

    /// Registers a listener for a named event.
    pub fn on<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.notifier.bus().on(event, listener);
    }

    // Queries

    /// Returns the name of the active state.
    #[must_use]
    pub fn current_state(&self) -> Option<String> {
        self.read_graph().current().map(|state| state.name.clone())
    }

    /// Returns the name of the state a rollback would return to.
    #[must_use]
    pub fn previous_state(&self) -> Option<String> {
        self.read_graph().previous().map(|state| state.name.clone())
    }

    #[must_use]
    pub fn states(&self) -> Vec<State> {
        self.read_graph().states().to_vec()
    }

    #[must_use]
    pub fn transitions(&self) -> Vec<Edge> {
        self.read_graph().edges().to_vec()
    }

    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.read_graph().event_names()
    }

    /// Returns the edges leaving the active state.
    #[must_use]
    pub fn available_transitions(&self) -> Vec<Edge> {
        let graph = self.read_graph();
        let Some(current) = graph.current() else {
            return Vec::new();
        };
        graph.edges_from(&current.name).into_iter().cloned().collect()
    }

    /// Returns armed delayed transitions, soonest first.
    #[must_use]
    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        self.inner.timers.pending()
    }

    /// Renders the graph as text, one line per edge.
    #[must_use]
    pub fn visualize(&self) -> String {
        self.read_graph().visualize()
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        self.read_graph().to_dot()
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    #[must_use]
    pub fn rules(&self) -> &RuleEngine {
        &self.inner.rules
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        self.inner.notifier.bus()
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    // Transitions

    /// Moves to `target`, now or after `delay`.
    ///
    /// The edge's guard is evaluated immediately either way. A delayed
    /// transition is applied by its timer without evaluating the guard again,
    /// provided the state it was scheduled from is still active.
    ///
    /// # Errors
    ///
    /// Returns the [`TransitionError`] that stopped the transition, or the
    /// rollback error if the automatic rollback also failed.
    #[instrument(skip(self))]
    pub async fn transition_to(
        &self,
        target: &str,
        delay: Duration,
    ) -> waypoint_core::Result<TransitionOutcome, TransitionError> {
        let _gate = self.inner.gate.lock().await;

        let result = match self.check_guard(target) {
            Ok(from) if !delay.is_zero() => Ok(self.schedule(from, target, delay)),
            Ok(_) => self
                .apply(target, ChangeOrigin::Transition)
                .await
                .map(TransitionOutcome::Applied),
            Err(error) => Err(error),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => Err(self.fail(target, error).await.into()),
        }
    }

    /// Returns to the previous state without evaluating any guard.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::NoPreviousState`] if there is nothing to
    /// return to, or the persistence or listener error that stopped it.
    #[instrument(skip(self))]
    pub async fn rollback(&self) -> waypoint_core::Result<StateChange, TransitionError> {
        let _gate = self.inner.gate.lock().await;
        match self.rollback_locked().await {
            Ok(change) => Ok(change),
            Err(TransitionError::NoPreviousState) => Err(TransitionError::NoPreviousState.into()),
            Err(error) => {
                self.report_error(None, &error);
                Err(error.into())
            }
        }
    }

    /// Cancels the pending delayed transition to `target`.
    ///
    /// Returns `false` if nothing was pending or the timer already fired.
    pub fn cancel_delayed(&self, target: &str) -> bool {
        let cancelled = self.inner.timers.cancel(target);
        if cancelled {
            self.inner.notifier.observe(&Notification::TimerCancelled {
                target: target.to_string(),
            });
        }
        cancelled
    }

    /// Cancels every pending delayed transition. Returns how many there were.
    pub fn cancel_all_timers(&self) -> usize {
        self.inner.timers.cancel_all()
    }

    /// Loads the persisted state and makes it active without guards.
    ///
    /// Also records the workflow version if the stored one differs. A stored
    /// state the graph does not know is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] from reading or writing the store.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> waypoint_core::Result<Option<StateChange>, StoreError> {
        let _gate = self.inner.gate.lock().await;
        let store = &self.inner.store;

        let stored_version = store.load_version().await?;
        if stored_version.as_deref() != Some(self.inner.version.as_str()) {
            info!(
                stored = stored_version.as_deref().unwrap_or("-"),
                version = %self.inner.version,
                "recording workflow version"
            );
            store.save_version(&self.inner.version).await?;
        }

        let Some(name) = store.load().await? else {
            debug!("no persisted state to restore");
            return Ok(None);
        };

        let moved = self.write_graph().force_active(&name);
        let Some(moved) = moved else {
            warn!(state = %name, "persisted state is not part of the workflow, ignoring it");
            return Ok(None);
        };

        let change = StateChange::new(moved.from, moved.to, ChangeOrigin::Bootstrap);
        self.inner
            .notifier
            .observe(&Notification::StateChanged(change.clone()));
        Ok(Some(change))
    }

    /// Step 1. Returns the current state name if the guard passes.
    fn check_guard(&self, target: &str) -> Result<String, TransitionError> {
        let (from, edge) = {
            let graph = self.read_graph();
            let from = graph
                .current()
                .map(|state| state.name.clone())
                .ok_or(TransitionError::NoCurrentState)?;
            let edge = graph.find_edge(&from, target).cloned();
            (from, edge)
        };

        let invalid = || TransitionError::InvalidTransition {
            from: from.clone(),
            to: target.to_string(),
        };
        let edge = edge.ok_or_else(invalid)?;
        if edge.guard(&self.inner.rules)? {
            Ok(from)
        } else {
            Err(invalid())
        }
    }

    /// Step 2.
    fn schedule(&self, from: String, target: &str, delay: Duration) -> TransitionOutcome {
        let weak = Arc::downgrade(&self.inner);
        let fire_target = target.to_string();
        let outcome = self.inner.timers.schedule(target, delay, move || async move {
            let Some(inner) = weak.upgrade() else {
                debug!(target = %fire_target, "workflow dropped before delayed transition fired");
                return;
            };
            WorkflowManager { inner }.fire_delayed(&from, &fire_target).await;
        });

        let timer_id = outcome.id();
        let fires_at = self
            .inner
            .timers
            .get(target)
            .map_or_else(Utc::now, |timer| timer.fires_at);

        if let ScheduleOutcome::Armed { .. } = outcome {
            self.inner.notifier.observe(&Notification::TimerScheduled {
                target: target.to_string(),
                timer_id,
                fires_at,
            });
        }

        TransitionOutcome::Scheduled {
            target: target.to_string(),
            timer_id,
            fires_at,
        }
    }

    async fn fire_delayed(&self, scheduled_from: &str, target: &str) {
        let _gate = self.inner.gate.lock().await;

        // Only valid from the state the guard was checked in. No rollback:
        // nothing has moved yet.
        let current = self.current_state();
        if current.as_deref() != Some(scheduled_from) {
            let error = TransitionError::InvalidTransition {
                from: current.unwrap_or_default(),
                to: target.to_string(),
            };
            warn!(%error, scheduled_from, "state changed since the delayed transition was scheduled");
            self.report_error(Some(target), &error);
            return;
        }

        if let Err(error) = self.apply(target, ChangeOrigin::Timer).await {
            let error = self.fail(target, error).await;
            warn!(%error, target, "delayed transition failed");
        }
    }

    /// Steps 3 to 6. The caller holds the gate.
    async fn apply(&self, target: &str, origin: ChangeOrigin) -> Result<StateChange, TransitionError> {
        let moved = self.write_graph().move_to(target)?;
        self.persist(&moved).await?;

        let change = StateChange::new(moved.from, moved.to, origin);
        info!(id = %change.id, %change, "transition applied");
        self.announce(&change)?;
        Ok(change)
    }

    /// The caller holds the gate.
    async fn rollback_locked(&self) -> Result<StateChange, TransitionError> {
        let moved = self.write_graph().move_back()?;
        self.persist(&moved).await?;

        let change = StateChange::new(moved.from, moved.to, ChangeOrigin::Rollback);
        info!(id = %change.id, %change, "rolled back");

        let notification = Notification::StateChanged(change.clone());
        self.inner.notifier.observe(&notification);
        self.trigger(STATE_CHANGE_EVENT, &notification)?;
        self.trigger(ROLLBACK_EVENT, &notification)?;
        Ok(change)
    }

    /// Writes the new current state, retrying per the persist policy. When
    /// every attempt fails the pointer move is undone.
    async fn persist(&self, moved: &PointerMove) -> Result<(), TransitionError> {
        let PersistPolicy { attempts, backoff } = self.inner.persist;
        let mut attempt = 1;
        loop {
            let error = match self.inner.store.save(&moved.to).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            if attempt >= attempts {
                warn!(%error, attempts, state = %moved.to, "giving up persisting state, reverting");
                self.write_graph().revert(moved.checkpoint);
                return Err(TransitionError::StorageFailed {
                    reason: error.to_string(),
                });
            }

            warn!(%error, attempt, state = %moved.to, "persisting state failed, retrying");
            tokio::time::sleep(backoff.saturating_mul(attempt)).await;
            attempt += 1;
        }
    }

    /// Step 6.
    fn announce(&self, change: &StateChange) -> Result<(), TransitionError> {
        let notification = Notification::StateChanged(change.clone());
        self.inner.notifier.observe(&notification);
        self.trigger(STATE_CHANGE_EVENT, &notification)?;

        let synthetic = synthetic_event_name(&change.to);
        self.trigger(&synthetic, &notification)?;
        let named = self.read_graph().event(&synthetic).cloned();
        if let Some(event) = named {
            event
                .fire(&notification)
                .map_err(|e| listener_failed(&synthetic, e))?;
        }

        if let Some(from) = &change.from {
            self.inner.notifier.deliver_webhook(WebhookPayload {
                from: from.clone(),
                to: change.to.clone(),
                timestamp: change.at,
            });
        }
        Ok(())
    }

    fn trigger(&self, event: &str, notification: &Notification) -> Result<(), TransitionError> {
        self.inner
            .notifier
            .bus()
            .trigger(event, notification)
            .map_err(|e| listener_failed(event, e))
    }

    fn report_error(&self, target: Option<&str>, error: &TransitionError) {
        let notification = Notification::workflow_error(target, error);
        self.inner.notifier.observe(&notification);
        if let Err(listener_error) = self
            .inner
            .notifier
            .bus()
            .trigger(WORKFLOW_ERROR_EVENT, &notification)
        {
            warn!(%listener_error, "workflowError listener failed");
        }
    }

    /// Reports `error` and rolls back if there is a previous state. A failed
    /// persist has already been reverted, so it is not rolled back again.
    async fn fail(&self, target: &str, error: TransitionError) -> TransitionError {
        warn!(%error, target, "transition failed");
        self.report_error(Some(target), &error);

        let has_previous = self.read_graph().previous().is_some();
        if matches!(error, TransitionError::StorageFailed { .. }) || !has_previous {
            return error;
        }

        match self.rollback_locked().await {
            Ok(_) => error,
            Err(rollback_error) => {
                warn!(%rollback_error, "automatic rollback failed");
                self.report_error(Some(target), &rollback_error);
                rollback_error
            }
        }
    }
}

impl Default for WorkflowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkflowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowManager")
            .field("current", &self.current_state())
            .field("version", &self.inner.version)
            .field("store", &self.inner.store)
            .field("pending_timers", &self.inner.timers.pending().len())
            .finish()
    }
}

fn listener_failed(event: &str, error: ListenerError) -> TransitionError {
    TransitionError::ListenerFailed {
        event: event.to_string(),
        reason: error.reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::WorkflowMonitor;
    use crate::notify::{WebhookError, WebhookSink};
    use crate::store::test_support::FlakyBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const NOW: Duration = Duration::ZERO;

    struct Fixture {
        manager: WorkflowManager,
        monitor: Arc<WorkflowMonitor>,
    }

    fn fixture_with(store: StateStore, persist: PersistPolicy) -> Fixture {
        let monitor = Arc::new(WorkflowMonitor::new());
        let manager = WorkflowManager::builder()
            .notifier(Notifier::new().with_observer(monitor.clone()))
            .store(store)
            .persist_policy(persist)
            .build();

        for name in ["initial", "in_progress", "completed"] {
            manager.add_state(State::new(name)).unwrap();
        }
        manager.add_transition(Edge::new("initial", "in_progress", "always"));
        manager.add_transition(Edge::new("in_progress", "completed", "approved"));
        manager.add_transition(Edge::new("in_progress", "initial", "always"));
        manager.add_transition(Edge::new("completed", "archived", "always"));
        manager.add_rule("always", || true);
        manager.add_rule("never", || false);
        manager.add_rule("approved", || true);

        Fixture { manager, monitor }
    }

    fn fixture() -> Fixture {
        fixture_with(StateStore::in_memory(), PersistPolicy::default())
    }

    fn counting_listener(manager: &WorkflowManager, event: &str) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        manager.on(event, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        hits
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn always_guard_applies_and_is_recorded() {
        let Fixture { manager, monitor } = fixture();

        let outcome = manager.transition_to("in_progress", NOW).await.unwrap();

        assert!(!outcome.is_scheduled());
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
        assert_eq!(manager.previous_state().as_deref(), Some("initial"));
        assert_eq!(monitor.render(), vec!["initial -> in_progress"]);
        assert_eq!(
            manager.store().load().await.unwrap().as_deref(),
            Some("in_progress")
        );
    }

    #[tokio::test]
    async fn false_guard_is_invalid_and_state_is_unchanged() {
        let Fixture { manager, monitor } = fixture();
        manager.add_rule("always", || false);

        let err = manager.transition_to("in_progress", NOW).await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &TransitionError::InvalidTransition {
                from: "initial".to_string(),
                to: "in_progress".to_string()
            }
        );
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
        assert_eq!(monitor.errors().len(), 1);
        assert!(monitor.transitions().is_empty());
    }

    #[tokio::test]
    async fn missing_edge_is_invalid() {
        let Fixture { manager, .. } = fixture();
        let err = manager.transition_to("completed", NOW).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            TransitionError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn unregistered_rule_is_reported() {
        let Fixture { manager, .. } = fixture();
        manager.add_transition(Edge::new("initial", "completed", "audited"));

        let err = manager.transition_to("completed", NOW).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &TransitionError::RuleNotFound {
                rule: "audited".to_string()
            }
        );
    }

    #[tokio::test]
    async fn rules_are_resolved_at_evaluation_time() {
        let Fixture { manager, .. } = fixture();
        manager.add_rule("approved", || false);
        manager.transition_to("in_progress", NOW).await.unwrap();

        let approved = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&approved);
        manager.add_rule("approved", move || flag.load(Ordering::SeqCst));

        approved.store(true, Ordering::SeqCst);
        manager.transition_to("completed", NOW).await.unwrap();
        assert_eq!(manager.current_state().as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn unknown_target_rolls_back_to_prior_state() {
        let Fixture { manager, monitor } = fixture();
        manager.transition_to("in_progress", NOW).await.unwrap();
        manager.transition_to("completed", NOW).await.unwrap();

        let err = manager.transition_to("archived", NOW).await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &TransitionError::UnknownState {
                name: "archived".to_string()
            }
        );
        assert_eq!(manager.current_state().as_deref(), Some("completed"));
        assert!(manager.previous_state().is_none());
        assert_eq!(
            monitor.render().last().map(String::as_str),
            Some("rollback: completed -> completed")
        );
    }

    #[tokio::test]
    async fn rollback_consumes_previous_state() {
        let Fixture { manager, monitor } = fixture();
        let rollbacks = counting_listener(&manager, ROLLBACK_EVENT);
        manager.transition_to("in_progress", NOW).await.unwrap();

        let change = manager.rollback().await.unwrap();

        assert_eq!(change.origin, ChangeOrigin::Rollback);
        assert_eq!(change.to, "initial");
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
        assert!(manager.previous_state().is_none());
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(
            monitor.render(),
            vec!["initial -> in_progress", "rollback: in_progress -> initial"]
        );

        let err = manager.rollback().await.unwrap_err();
        assert_eq!(err.current_context(), &TransitionError::NoPreviousState);
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
    }

    #[tokio::test]
    async fn rollback_without_history_fails() {
        let Fixture { manager, .. } = fixture();
        let err = manager.rollback().await.unwrap_err();
        assert_eq!(err.current_context(), &TransitionError::NoPreviousState);
    }

    #[tokio::test]
    async fn rejected_transition_rolls_back_earlier_one() {
        let Fixture { manager, .. } = fixture();
        manager.add_rule("approved", || false);
        manager.transition_to("in_progress", NOW).await.unwrap();

        let err = manager.transition_to("completed", NOW).await.unwrap_err();

        assert!(err.current_context().is_rejection());
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
        assert!(manager.previous_state().is_none());
    }

    #[tokio::test]
    async fn listener_failure_rolls_back() {
        let Fixture { manager, monitor } = fixture();
        manager.transition_to("in_progress", NOW).await.unwrap();
        manager.on(synthetic_event_name("completed"), |_| {
            Err(ListenerError::new("ledger closed"))
        });

        let err = manager.transition_to("completed", NOW).await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &TransitionError::ListenerFailed {
                event: "transitionTocompleted".to_string(),
                reason: "ledger closed".to_string()
            }
        );
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
        assert_eq!(
            manager.store().load().await.unwrap().as_deref(),
            Some("in_progress")
        );
        assert_eq!(monitor.errors().len(), 1);
    }

    #[tokio::test]
    async fn failed_rollback_error_is_returned() {
        let Fixture { manager, .. } = fixture();
        manager.transition_to("in_progress", NOW).await.unwrap();
        manager.on(synthetic_event_name("completed"), |_| {
            Err(ListenerError::new("first"))
        });
        manager.on(ROLLBACK_EVENT, |_| Err(ListenerError::new("second")));

        let err = manager.transition_to("completed", NOW).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &TransitionError::ListenerFailed {
                event: ROLLBACK_EVENT.to_string(),
                reason: "second".to_string()
            }
        );
    }

    #[tokio::test]
    async fn notifications_fire_in_order() {
        let Fixture { manager, .. } = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for event in [STATE_CHANGE_EVENT, "transitionToin_progress"] {
            let seen = Arc::clone(&seen);
            manager.on(event, move |_| {
                seen.lock().unwrap().push(event);
                Ok(())
            });
        }
        let named = Arc::clone(&seen);
        manager.add_event(Event::new("transitionToin_progress", move |_| {
            named.lock().unwrap().push("named");
            Ok(())
        }));

        manager.transition_to("in_progress", NOW).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![STATE_CHANGE_EVENT, "transitionToin_progress", "named"]
        );
    }

    #[tokio::test]
    async fn workflow_error_listeners_hear_failures() {
        let Fixture { manager, .. } = fixture();
        let errors = counting_listener(&manager, WORKFLOW_ERROR_EVENT);
        manager.on(WORKFLOW_ERROR_EVENT, |_| Err(ListenerError::new("ignored")));

        assert!(manager.transition_to("completed", NOW).await.is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exactly_one_state_active_across_sequences() {
        let Fixture { manager, .. } = fixture();
        manager.add_transition(Edge::new("completed", "initial", "always"));
        manager.add_transition(Edge::new("initial", "completed", "never"));

        let targets = ["in_progress", "completed", "initial", "archived", "ghost"];
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..200 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let target = targets[(seed >> 16) as usize % targets.len()];

            let _ = manager.transition_to(target, NOW).await;
            let active: Vec<State> = manager
                .states()
                .into_iter()
                .filter(|state| state.is_active)
                .collect();
            assert_eq!(active.len(), 1, "after requesting {target}");
            assert_eq!(Some(active[0].name.clone()), manager.current_state());
        }
    }

    #[tokio::test]
    async fn empty_workflow_has_no_current_state() {
        let manager = WorkflowManager::new();
        let err = manager.transition_to("anywhere", NOW).await.unwrap_err();
        assert_eq!(err.current_context(), &TransitionError::NoCurrentState);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_transition_applies_after_delay() {
        let Fixture { manager, monitor } = fixture();

        let outcome = manager
            .transition_to("in_progress", Duration::from_millis(500))
            .await
            .unwrap();

        assert!(outcome.is_scheduled());
        assert_eq!(manager.pending_timers().len(), 1);
        advance(499).await;
        assert_eq!(manager.current_state().as_deref(), Some("initial"));

        advance(10).await;
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
        assert!(manager.pending_timers().is_empty());
        let last = monitor.last_transition().unwrap();
        assert_eq!(last.origin, ChangeOrigin::Timer);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_transition_checks_guard_up_front() {
        let Fixture { manager, .. } = fixture();
        let err = manager
            .transition_to("completed", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            TransitionError::InvalidTransition { .. }
        ));
        assert!(manager.pending_timers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_reschedules_fire_once() {
        let Fixture { manager, .. } = fixture();
        let changes = counting_listener(&manager, STATE_CHANGE_EVENT);

        let first = manager
            .transition_to("in_progress", Duration::from_millis(300))
            .await
            .unwrap();
        let second = manager
            .transition_to("in_progress", Duration::from_millis(300))
            .await
            .unwrap();
        assert_ne!(first, second);

        advance(1000).await;
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delayed_transition_never_fires() {
        let Fixture { manager, .. } = fixture();
        manager
            .transition_to("in_progress", Duration::from_millis(300))
            .await
            .unwrap();

        assert!(manager.cancel_delayed("in_progress"));
        assert!(!manager.cancel_delayed("in_progress"));

        advance(1000).await;
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_from_a_left_state_is_rejected() {
        let Fixture { manager, monitor } = fixture();
        manager.add_transition(Edge::new("initial", "completed", "always"));
        let changes = counting_listener(&manager, STATE_CHANGE_EVENT);
        let errors = counting_listener(&manager, WORKFLOW_ERROR_EVENT);

        manager
            .transition_to("in_progress", Duration::from_millis(1000))
            .await
            .unwrap();
        manager.transition_to("completed", NOW).await.unwrap();
        advance(1100).await;

        assert_eq!(manager.current_state().as_deref(), Some("completed"));
        assert_eq!(manager.previous_state().as_deref(), Some("initial"));
        assert!(manager.pending_timers().is_empty());
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        let recorded = monitor.errors();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].target.as_deref(), Some("in_progress"));
        assert_eq!(
            recorded[0].error,
            TransitionError::InvalidTransition {
                from: "completed".to_string(),
                to: "in_progress".to_string(),
            }
            .to_string()
        );
        assert_eq!(manager.store().load().await.unwrap().as_deref(), Some("completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_returning_to_its_source_state() {
        let Fixture { manager, .. } = fixture();
        manager.transition_to("in_progress", NOW).await.unwrap();
        manager
            .transition_to("completed", Duration::from_millis(300))
            .await
            .unwrap();
        manager.transition_to("initial", NOW).await.unwrap();
        manager.transition_to("in_progress", NOW).await.unwrap();

        advance(500).await;
        assert_eq!(manager.current_state().as_deref(), Some("completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_persist_backoff_saturates() {
        let backend = Arc::new(FlakyBackend::failing(2));
        let policy = PersistPolicy {
            attempts: 3,
            backoff: Duration::MAX,
        };
        let Fixture { manager, .. } = fixture_with(StateStore::new(backend.clone()), policy);

        manager.transition_to("in_progress", NOW).await.unwrap();

        assert_eq!(backend.write_attempts(), 3);
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_manager_makes_timer_a_no_op() {
        let Fixture { manager, .. } = fixture();
        let store = manager.store().clone();
        manager
            .transition_to("in_progress", Duration::from_millis(300))
            .await
            .unwrap();
        let timers = manager.inner.timers.clone();
        drop(manager);

        advance(500).await;
        assert!(timers.pending().is_empty());
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn persistence_failure_reverts_change() {
        let backend = Arc::new(FlakyBackend::failing(3));
        let policy = PersistPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let Fixture { manager, monitor } = fixture_with(StateStore::new(backend.clone()), policy);
        let changes = counting_listener(&manager, STATE_CHANGE_EVENT);

        let err = manager.transition_to("in_progress", NOW).await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            TransitionError::StorageFailed { .. }
        ));
        assert_eq!(backend.write_attempts(), 3);
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
        assert!(manager.previous_state().is_none());
        assert!(!manager.states()[1].is_active);
        assert_eq!(changes.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.errors().len(), 1);

        manager.transition_to("in_progress", NOW).await.unwrap();
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
    }

    #[tokio::test]
    async fn persistence_retries_until_success() {
        let backend = Arc::new(FlakyBackend::failing(2));
        let policy = PersistPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let Fixture { manager, .. } = fixture_with(StateStore::new(backend.clone()), policy);

        manager.transition_to("in_progress", NOW).await.unwrap();
        assert_eq!(backend.write_attempts(), 3);
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
    }

    #[tokio::test]
    async fn rollback_persistence_failure_keeps_state() {
        let backend = Arc::new(FlakyBackend::failing(0));
        let policy = PersistPolicy {
            attempts: 1,
            backoff: Duration::from_millis(1),
        };
        let Fixture { manager, .. } = fixture_with(StateStore::new(backend.clone()), policy);
        manager.transition_to("in_progress", NOW).await.unwrap();

        backend.set_failures(1);
        let err = manager.rollback().await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            TransitionError::StorageFailed { .. }
        ));
        assert_eq!(manager.current_state().as_deref(), Some("in_progress"));
        assert_eq!(manager.previous_state().as_deref(), Some("initial"));
    }

    #[tokio::test]
    async fn restore_activates_persisted_state() {
        let store = StateStore::in_memory();
        store.save("completed").await.unwrap();
        let Fixture { manager, monitor } = fixture_with(store.clone(), PersistPolicy::default());

        let change = manager.restore().await.unwrap().unwrap();

        assert_eq!(change.origin, ChangeOrigin::Bootstrap);
        assert_eq!(manager.current_state().as_deref(), Some("completed"));
        assert_eq!(manager.states().iter().filter(|s| s.is_active).count(), 1);
        assert_eq!(monitor.render(), vec!["bootstrap: initial -> completed"]);
        assert_eq!(
            store.load_version().await.unwrap().as_deref(),
            Some(crate::definition::DEFAULT_VERSION)
        );
    }

    #[tokio::test]
    async fn restore_ignores_unknown_state() {
        let store = StateStore::in_memory();
        store.save("retired").await.unwrap();
        let Fixture { manager, .. } = fixture_with(store, PersistPolicy::default());

        assert!(manager.restore().await.unwrap().is_none());
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
    }

    #[tokio::test]
    async fn restore_with_empty_store_is_a_no_op() {
        let Fixture { manager, .. } = fixture();
        assert!(manager.restore().await.unwrap().is_none());
        assert_eq!(manager.current_state().as_deref(), Some("initial"));
    }

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<WebhookPayload>>,
    }

    #[async_trait]
    impl WebhookSink for RecordingSink {
        async fn deliver(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn webhook_receives_transitions_but_not_rollbacks() {
        let sink = Arc::new(RecordingSink::default());
        let manager = WorkflowManager::builder()
            .notifier(Notifier::new().with_webhook(sink.clone()))
            .build();
        manager.add_state(State::new("initial")).unwrap();
        manager.add_state(State::new("in_progress")).unwrap();
        manager.add_transition(Edge::new("initial", "in_progress", "always"));
        manager.add_rule("always", || true);

        manager.transition_to("in_progress", NOW).await.unwrap();
        manager.rollback().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let payloads = sink.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].from, "initial");
        assert_eq!(payloads[0].to, "in_progress");
    }

    #[tokio::test]
    async fn queries_reflect_graph() {
        let Fixture { manager, .. } = fixture();
        manager.add_event(Event::new("transitionTocompleted", |_| Ok(())));

        assert_eq!(manager.states().len(), 3);
        assert_eq!(manager.transitions().len(), 4);
        assert_eq!(manager.events(), vec!["transitionTocompleted"]);
        let available: Vec<String> = manager
            .available_transitions()
            .into_iter()
            .map(|edge| edge.to)
            .collect();
        assert_eq!(available, vec!["in_progress"]);
        assert!(manager.visualize().contains("initial --[always]--> in_progress"));
        assert!(
            manager
                .add_state(State::new("initial"))
                .unwrap_err()
                .current_context()
                == &DefinitionError::DuplicateState {
                    name: "initial".to_string()
                }
        );
    }
}

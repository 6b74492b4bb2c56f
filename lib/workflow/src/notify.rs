//! Notification fan-out.
//!
//! Three kinds of consumers hear about what the engine does:
//! - **Listeners** registered with [`EventBus::on`] under an event name. They
//!   run synchronously in registration order and may fail; the first failure
//!   stops dispatch and is returned to the caller.
//! - **Observers** ([`WorkflowObserver`]) see every [`Notification`]. They are
//!   a side channel for logging and monitoring and cannot fail.
//! - An optional **webhook sink** ([`WebhookSink`]) receives `{from, to}` after
//!   each applied transition. Delivery is spawned and its failures are only
//!   logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};
use waypoint_core::{TimerId, TransitionId};

/// Event fired after every applied state change.
pub const STATE_CHANGE_EVENT: &str = "stateChange";

/// Event fired when a transition attempt fails.
pub const WORKFLOW_ERROR_EVENT: &str = "workflowError";

/// Event fired after a rollback is applied.
pub const ROLLBACK_EVENT: &str = "rollback";

/// Prefix of the synthetic event fired on arrival at a state.
pub const TRANSITION_EVENT_PREFIX: &str = "transitionTo";

/// Returns the synthetic event name for arriving at `target`.
#[must_use]
pub fn synthetic_event_name(target: &str) -> String {
    format!("{TRANSITION_EVENT_PREFIX}{target}")
}

/// What caused a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// An immediate `transition_to`.
    Transition,
    /// A delayed transition whose timer fired.
    Timer,
    /// A rollback to the previous state.
    Rollback,
    /// State restored from storage at startup.
    Bootstrap,
}

impl ChangeOrigin {
    /// Short label used in logs and rendered history.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Transition => "transition",
            Self::Timer => "timer",
            Self::Rollback => "rollback",
            Self::Bootstrap => "bootstrap",
        }
    }
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An applied change of the active state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Id of this change.
    pub id: TransitionId,
    /// The state that was active before, if any.
    pub from: Option<String>,
    /// The state that is active now.
    pub to: String,
    /// What caused the change.
    pub origin: ChangeOrigin,
    /// When the change was applied.
    pub at: DateTime<Utc>,
}

impl StateChange {
    pub(crate) fn new(from: Option<String>, to: impl Into<String>, origin: ChangeOrigin) -> Self {
        Self {
            id: TransitionId::new(),
            from,
            to: to.into(),
            origin,
            at: Utc::now(),
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.as_deref().unwrap_or("-");
        match self.origin {
            ChangeOrigin::Transition => write!(f, "{from} -> {}", self.to),
            origin => write!(f, "{origin}: {from} -> {}", self.to),
        }
    }
}

/// Everything the engine reports to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The active state changed.
    StateChanged(StateChange),
    /// A transition attempt failed.
    WorkflowError {
        /// The requested target, when the failure belongs to a transition.
        target: Option<String>,
        /// Rendered error.
        error: String,
        /// When the failure was observed.
        at: DateTime<Utc>,
    },
    /// A delayed transition was armed.
    TimerScheduled {
        target: String,
        timer_id: TimerId,
        fires_at: DateTime<Utc>,
    },
    /// A pending delayed transition was cancelled.
    TimerCancelled { target: String },
}

impl Notification {
    pub(crate) fn workflow_error(target: Option<&str>, error: impl fmt::Display) -> Self {
        Self::WorkflowError {
            target: target.map(str::to_string),
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// A listener failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerError {
    /// Why the listener failed.
    pub reason: String,
}

impl ListenerError {
    /// Creates a listener error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener failed: {}", self.reason)
    }
}

impl std::error::Error for ListenerError {}

/// A fallible callback invoked with the notification that triggered it.
pub type Listener = Arc<dyn Fn(&Notification) -> Result<(), ListenerError> + Send + Sync>;

/// Named-event listener registry.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<String, Vec<Listener>>>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `event`.
    pub fn on<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Notification) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Invokes every listener for `event` in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first listener error; later listeners are not invoked.
    pub fn trigger(&self, event: &str, notification: &Notification) -> Result<(), ListenerError> {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default();

        if !listeners.is_empty() {
            debug!(event, listeners = listeners.len(), "triggering event");
        }
        for listener in listeners {
            listener(notification)?;
        }
        Ok(())
    }

    /// Returns how many listeners are registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let mut events: Vec<&String> = listeners.keys().collect();
        events.sort();
        f.debug_struct("EventBus").field("events", &events).finish()
    }
}

/// Side-channel consumer of engine notifications.
pub trait WorkflowObserver: Send + Sync {
    /// Called for every notification, in the order the engine emits them.
    fn on_notification(&self, notification: &Notification);
}

/// Body posted to the webhook after a transition is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// The state that was left.
    pub from: String,
    /// The state that was entered.
    pub to: String,
    /// When the transition was applied.
    pub timestamp: DateTime<Utc>,
}

/// Errors from webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// The request could not be sent.
    RequestFailed { message: String },
    /// The receiver answered with a non-success status.
    Rejected { status: u16 },
}

impl fmt::Display for WebhookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed { message } => write!(f, "webhook request failed: {message}"),
            Self::Rejected { status } => write!(f, "webhook rejected with status {status}"),
        }
    }
}

impl std::error::Error for WebhookError {}

/// Destination for transition webhooks.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Delivers one payload.
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), WebhookError>;
}

/// Bundles the listener bus, observers, and webhook sink the engine notifies.
#[derive(Clone, Default)]
pub struct Notifier {
    bus: EventBus,
    observers: Vec<Arc<dyn WorkflowObserver>>,
    webhook: Option<Arc<dyn WebhookSink>>,
}

impl Notifier {
    /// Creates a notifier with an empty bus and no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Sets the webhook sink.
    #[must_use]
    pub fn with_webhook(mut self, webhook: Arc<dyn WebhookSink>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Returns the listener bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns whether a webhook sink is configured.
    #[must_use]
    pub fn has_webhook(&self) -> bool {
        self.webhook.is_some()
    }

    /// Passes `notification` to every observer.
    pub fn observe(&self, notification: &Notification) {
        for observer in &self.observers {
            observer.on_notification(notification);
        }
    }

    /// Spawns delivery of `payload` to the webhook sink, if one is set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn deliver_webhook(&self, payload: WebhookPayload) {
        let Some(webhook) = self.webhook.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(error) = webhook.deliver(&payload).await {
                warn!(%error, from = %payload.from, to = %payload.to, "webhook delivery failed");
            }
        });
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("bus", &self.bus)
            .field("observers", &self.observers.len())
            .field("webhook", &self.webhook.is_some())
            .finish()
    }
}

//! Transition history observer.

use crate::notify::{ChangeOrigin, Notification, StateChange, WorkflowObserver};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};
use waypoint_core::TransitionId;

/// How many records a monitor keeps by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// One applied state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: TransitionId,
    pub from: Option<String>,
    pub to: String,
    pub origin: ChangeOrigin,
    pub at: DateTime<Utc>,
}

impl From<&StateChange> for TransitionRecord {
    fn from(change: &StateChange) -> Self {
        Self {
            id: change.id,
            from: change.from.clone(),
            to: change.to.clone(),
            origin: change.origin,
            at: change.at,
        }
    }
}

/// One failed transition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub target: Option<String>,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Logs {
    transitions: VecDeque<TransitionRecord>,
    errors: VecDeque<ErrorRecord>,
}

/// Observer that logs every notification and keeps a bounded history.
///
/// Once `capacity` records of a kind are held, the oldest is dropped.
#[derive(Debug)]
pub struct WorkflowMonitor {
    capacity: usize,
    logs: Mutex<Logs>,
}

impl Default for WorkflowMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowMonitor {
    /// Creates a monitor with [`DEFAULT_HISTORY_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a monitor keeping at most `capacity` records of each kind.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            logs: Mutex::new(Logs::default()),
        }
    }

    /// Returns applied changes, oldest first.
    #[must_use]
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.lock().transitions.iter().cloned().collect()
    }

    /// Returns recorded failures, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.lock().errors.iter().cloned().collect()
    }

    /// Returns the most recent applied change.
    #[must_use]
    pub fn last_transition(&self) -> Option<TransitionRecord> {
        self.lock().transitions.back().cloned()
    }

    /// Renders the history as `from -> to` lines, with non-transition
    /// origins prefixed by their label.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        self.lock()
            .transitions
            .iter()
            .map(|record| {
                let from = record.from.as_deref().unwrap_or("-");
                match record.origin {
                    ChangeOrigin::Transition => format!("{from} -> {}", record.to),
                    origin => format!("{origin}: {from} -> {}", record.to),
                }
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Logs> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push<T>(queue: &mut VecDeque<T>, capacity: usize, item: T) {
        if queue.len() == capacity {
            queue.pop_front();
        }
        queue.push_back(item);
    }
}

impl WorkflowObserver for WorkflowMonitor {
    fn on_notification(&self, notification: &Notification) {
        match notification {
            Notification::StateChanged(change) => {
                info!(
                    id = %change.id,
                    from = change.from.as_deref().unwrap_or("-"),
                    to = %change.to,
                    origin = %change.origin,
                    "state changed"
                );
                let mut logs = self.lock();
                Self::push(&mut logs.transitions, self.capacity, change.into());
            }
            Notification::WorkflowError { target, error, at } => {
                warn!(target = target.as_deref().unwrap_or("-"), %error, "workflow error");
                let mut logs = self.lock();
                Self::push(
                    &mut logs.errors,
                    self.capacity,
                    ErrorRecord {
                        target: target.clone(),
                        error: error.clone(),
                        at: *at,
                    },
                );
            }
            Notification::TimerScheduled {
                target,
                timer_id,
                fires_at,
            } => {
                debug!(%target, %timer_id, %fires_at, "delayed transition scheduled");
            }
            Notification::TimerCancelled { target } => {
                debug!(%target, "delayed transition cancelled");
            }
        }
    }
}

//! Keyed one-shot timers.
//!
//! Each armed timer is a spawned tokio task that sleeps for its delay, then
//! claims its slot in the registry. Claiming removes the slot, so the claim is
//! the cutover point: before it `cancel` aborts the task, after it the fire
//! action runs to completion and `cancel` finds nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;
use waypoint_core::TimerId;

/// What to do when a key is scheduled while a timer is already pending for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReschedulePolicy {
    /// Abort the pending timer and arm the new one (last write wins).
    #[default]
    Replace,
    /// Leave the pending timer alone and discard the new request.
    KeepExisting,
}

/// A snapshot of an armed, not-yet-fired timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTimer {
    /// Timer id.
    pub id: TimerId,
    /// The key the timer is registered under.
    pub key: String,
    /// When the timer was armed.
    pub armed_at: DateTime<Utc>,
    /// When the timer is due.
    pub fires_at: DateTime<Utc>,
}

/// Result of [`TimerRegistry::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new timer was armed, possibly replacing a pending one.
    Armed {
        id: TimerId,
        replaced: Option<TimerId>,
    },
    /// A timer was already pending and the policy kept it.
    AlreadyPending { id: TimerId },
}

impl ScheduleOutcome {
    /// The id of the timer that is pending after the call.
    #[must_use]
    pub fn id(&self) -> TimerId {
        match self {
            Self::Armed { id, .. } | Self::AlreadyPending { id } => *id,
        }
    }
}

struct Slot {
    timer: PendingTimer,
    abort: AbortHandle,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of pending timers, at most one per key.
///
/// Cloning is cheap and clones share the same pending set.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    slots: Slots,
    policy: ReschedulePolicy,
}

impl TimerRegistry {
    /// Creates an empty registry with the default [`ReschedulePolicy::Replace`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with the given rescheduling policy.
    #[must_use]
    pub fn with_policy(policy: ReschedulePolicy) -> Self {
        Self {
            slots: Slots::default(),
            policy,
        }
    }

    /// Returns the rescheduling policy.
    #[must_use]
    pub fn policy(&self) -> ReschedulePolicy {
        self.policy
    }

    /// Arms a one-shot timer for `key` that runs `fire` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: impl Into<String>, delay: Duration, fire: F) -> ScheduleOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        // Held across spawn so the task cannot claim before its slot exists.
        let mut slots = lock(&self.slots);

        if self.policy == ReschedulePolicy::KeepExisting
            && let Some(existing) = slots.get(&key)
        {
            debug!(key = %key, timer_id = %existing.timer.id, "timer already pending, keeping it");
            return ScheduleOutcome::AlreadyPending {
                id: existing.timer.id,
            };
        }

        let id = TimerId::new();
        let armed_at = Utc::now();
        let fires_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| armed_at.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let task_slots = Arc::clone(&self.slots);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !claim(&task_slots, &task_key, id) {
                debug!(key = %task_key, timer_id = %id, "timer lost its slot before firing");
                return;
            }
            debug!(key = %task_key, timer_id = %id, "timer firing");
            fire().await;
        });

        let slot = Slot {
            timer: PendingTimer {
                id,
                key: key.clone(),
                armed_at,
                fires_at,
            },
            abort: handle.abort_handle(),
        };

        let replaced = slots.insert(key.clone(), slot).map(|old| {
            old.abort.abort();
            old.timer.id
        });

        match replaced {
            Some(old) => debug!(key = %key, timer_id = %id, replaced = %old, "timer replaced"),
            None => debug!(key = %key, timer_id = %id, ?delay, "timer armed"),
        }

        ScheduleOutcome::Armed { id, replaced }
    }

    /// Cancels the pending timer for `key`.
    ///
    /// Returns `true` if a timer was pending. Cancelling a key with nothing
    /// pending, or whose timer has already started firing, does nothing.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = lock(&self.slots).remove(key);
        match removed {
            Some(slot) => {
                slot.abort.abort();
                debug!(key, timer_id = %slot.timer.id, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        for slot in &drained {
            slot.abort.abort();
        }
        drained.len()
    }

    /// Returns whether a timer is pending for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        lock(&self.slots).contains_key(key)
    }

    /// Returns the pending timer for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PendingTimer> {
        lock(&self.slots).get(key).map(|slot| slot.timer.clone())
    }

    /// Returns all pending timers ordered by due time.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingTimer> {
        let mut timers: Vec<PendingTimer> = lock(&self.slots)
            .values()
            .map(|slot| slot.timer.clone())
            .collect();
        timers.sort_by_key(|timer| (timer.fires_at, timer.id));
        timers
    }
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("policy", &self.policy)
            .field("pending", &lock(&self.slots).len())
            .finish()
    }
}

/// Removes the slot for `key` if it still belongs to timer `id`.
fn claim(slots: &Slots, key: &str, id: TimerId) -> bool {
    let mut slots = lock(slots);
    match slots.get(key) {
        Some(slot) if slot.timer.id == id => {
            slots.remove(key);
            true
        }
        _ => false,
    }
}

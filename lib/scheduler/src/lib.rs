//! Timer subsystem for delayed workflow transitions.
//!
//! Timers are one-shot tokio tasks keyed by name. At most one timer is
//! pending per key; a timer fires at most once and can be cancelled until the
//! moment it claims its slot.

pub mod timer;

pub use timer::{PendingTimer, ReschedulePolicy, ScheduleOutcome, TimerRegistry};

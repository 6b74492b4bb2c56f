//! Finite-state workflow engine.
//!
//! This crate provides:
//!
//! - **Rule Engine**: named guard predicates resolved when an edge is evaluated
//! - **Graph Model**: states, guarded edges, and named events
//! - **Transition Engine**: guarded transitions, delayed transitions, and rollback
//! - **Persistence**: current state and version over memory, NATS KV, or Postgres
//! - **Notifications**: listeners, observers, and an optional webhook

pub mod definition;
pub mod edge;
pub mod error;
pub mod event;
pub mod graph;
pub mod manager;
pub mod monitor;
pub mod nats;
pub mod notify;
pub mod plugin;
pub mod postgres;
pub mod rule;
pub mod state;
pub mod store;

pub use definition::{DefinitionWarning, WorkflowDefinition};
pub use edge::Edge;
pub use error::{DefinitionError, RuleError, TransitionError};
pub use event::Event;
pub use graph::WorkflowGraph;
pub use manager::{PersistPolicy, TransitionOutcome, WorkflowManager, WorkflowManagerBuilder};
pub use monitor::{ErrorRecord, TransitionRecord, WorkflowMonitor};
pub use notify::{
    ChangeOrigin, EventBus, ListenerError, Notification, Notifier, StateChange, WebhookError,
    WebhookPayload, WebhookSink, WorkflowObserver,
};
pub use plugin::{Plugin, PluginError, PluginRegistry};
pub use rule::RuleEngine;
pub use state::State;
pub use store::{KeyValueBackend, MemoryBackend, StateStore, StorageConfig, StorageKind, StoreError};
pub use waypoint_scheduler::{PendingTimer, ReschedulePolicy};

//! Persistence of the current state and workflow version.
//!
//! The engine persists through [`StateStore`], which sits on one
//! [`KeyValueBackend`] chosen at startup from configuration:
//!
//! - `memory`: [`MemoryBackend`], process-local
//! - `nats`: [`NatsKvBackend`](crate::nats::NatsKvBackend), a JetStream
//!   key-value bucket
//! - `postgres`: [`PostgresBackend`](crate::postgres::PostgresBackend), a
//!   namespaced key-value table
//!
//! Two keys are used: `currentState` and `version`.

use crate::nats::NatsKvBackend;
use crate::postgres::PostgresBackend;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Key holding the name of the active state.
pub const CURRENT_STATE_KEY: &str = "currentState";

/// Key holding the workflow version.
pub const VERSION_KEY: &str = "version";

/// Namespace (bucket, table partition) used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "waypoint";

/// Errors from storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Could not reach or set up the backend.
    ConnectionFailed { message: String },
    /// A read failed.
    ReadFailed { key: String, message: String },
    /// A write failed.
    WriteFailed { key: String, message: String },
    /// A stored value could not be decoded.
    Corrupt { key: String, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => write!(f, "storage connection failed: {message}"),
            Self::ReadFailed { key, message } => write!(f, "failed to read '{key}': {message}"),
            Self::WriteFailed { key, message } => write!(f, "failed to write '{key}': {message}"),
            Self::Corrupt { key, message } => write!(f, "stored value for '{key}' is corrupt: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// String key-value storage.
///
/// This abstraction lets the engine run against memory in tests and against
/// NATS or Postgres in production.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Reads a value. A missing key is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a value, replacing any existing one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Process-local backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Which backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Nats,
    Postgres,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Nats => "nats",
            Self::Postgres => "postgres",
        })
    }
}

/// Connection settings shared by the networked backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Server URL, e.g. `nats://localhost:4222` or `postgres://...`.
    #[serde(default)]
    pub uri: String,
    /// Bucket or namespace name.
    #[serde(default)]
    pub db_name: Option<String>,
}

impl StorageConfig {
    /// Creates settings for `uri` with the default namespace.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            db_name: None,
        }
    }

    /// Returns the configured namespace or [`DEFAULT_NAMESPACE`].
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.db_name.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// Connects the backend selected by `kind`.
///
/// # Errors
///
/// Returns [`StoreError::ConnectionFailed`] if a networked backend cannot be
/// reached or set up.
pub async fn connect_backend(
    kind: StorageKind,
    config: &StorageConfig,
) -> Result<Arc<dyn KeyValueBackend>, StoreError> {
    let backend: Arc<dyn KeyValueBackend> = match kind {
        StorageKind::Memory => Arc::new(MemoryBackend::new()),
        StorageKind::Nats => Arc::new(NatsKvBackend::connect(config).await?),
        StorageKind::Postgres => Arc::new(PostgresBackend::connect(config).await?),
    };
    info!(backend = backend.name(), namespace = config.namespace(), "storage backend ready");
    Ok(backend)
}

/// Reads and writes the workflow's persisted keys.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl StateStore {
    /// Wraps a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Creates a store over a fresh [`MemoryBackend`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Returns the backend name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Persists the name of the active state.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn save(&self, current_state: &str) -> Result<(), StoreError> {
        self.backend.set(CURRENT_STATE_KEY, current_state).await
    }

    /// Loads the persisted active state name.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn load(&self) -> Result<Option<String>, StoreError> {
        self.backend.get(CURRENT_STATE_KEY).await
    }

    /// Persists the workflow version.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn save_version(&self, version: &str) -> Result<(), StoreError> {
        self.backend.set(VERSION_KEY, version).await
    }

    /// Loads the persisted workflow version.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn load_version(&self) -> Result<Option<String>, StoreError> {
        self.backend.get(VERSION_KEY).await
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

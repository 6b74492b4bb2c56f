//! NATS JetStream key-value backend.
//!
//! Values live in one KV bucket named after the configured namespace
//! (`waypoint` by default). The bucket is created on first connect.

use crate::store::{KeyValueBackend, StorageConfig, StoreError};
use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use tracing::debug;

/// Backend storing values in a JetStream KV bucket.
pub struct NatsKvBackend {
    store: kv::Store,
    bucket: String,
}

impl NatsKvBackend {
    /// Connects to `config.uri` and opens (or creates) the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the connection or bucket
    /// setup fails.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let client = async_nats::connect(&config.uri).await.map_err(|e| {
            StoreError::ConnectionFailed {
                message: format!("failed to connect to {}: {e}", config.uri),
            }
        })?;

        let jetstream = jetstream::new(client);
        let bucket = config.namespace().to_string();
        let store = Self::open_bucket(&jetstream, &bucket).await?;

        Ok(Self { store, bucket })
    }

    async fn open_bucket(
        jetstream: &jetstream::Context,
        bucket: &str,
    ) -> Result<kv::Store, StoreError> {
        if let Ok(store) = jetstream.get_key_value(bucket).await {
            return Ok(store);
        }

        debug!(bucket, "creating key-value bucket");
        jetstream
            .create_key_value(kv::Config {
                bucket: bucket.to_string(),
                history: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                message: format!("failed to create bucket {bucket}: {e}"),
            })
    }

    /// Returns the bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn decode(key: &str, bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl KeyValueBackend for NatsKvBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .store
            .get(key)
            .await
            .map_err(|e| StoreError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        value.map(|bytes| decode(key, &bytes)).transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.store
            .put(key, value.as_bytes().to_vec().into())
            .await
            .map_err(|e| StoreError::WriteFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

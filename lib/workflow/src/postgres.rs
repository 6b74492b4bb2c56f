//! PostgreSQL key-value backend.
//!
//! Values live in a single table partitioned by namespace:
//!
//! ```sql
//! CREATE TABLE waypoint_kv (
//!     namespace TEXT NOT NULL,
//!     key TEXT NOT NULL,
//!     value TEXT NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     PRIMARY KEY (namespace, key)
//! )
//! ```

use crate::store::{KeyValueBackend, StorageConfig, StoreError};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS waypoint_kv (
        namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (namespace, key)
    )
"#;

/// Backend storing values in the `waypoint_kv` table.
pub struct PostgresBackend {
    pool: PgPool,
    namespace: String,
}

impl PostgresBackend {
    /// Connects to `config.uri` and creates the table if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the pool cannot connect or
    /// the table cannot be created.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.uri)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                message: e.to_string(),
            })?;

        Self::with_pool(pool, config.namespace()).await
    }

    /// Uses an existing pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the table cannot be created.
    pub async fn with_pool(pool: PgPool, namespace: impl Into<String>) -> Result<Self, StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                message: format!("failed to create waypoint_kv: {e}"),
            })?;

        Ok(Self {
            pool,
            namespace: namespace.into(),
        })
    }
}

#[async_trait]
impl KeyValueBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT value
            FROM waypoint_kv
            WHERE namespace = $1 AND key = $2
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::ReadFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO waypoint_kv (namespace, key, value, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (namespace, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

//! PostgreSQL key-value store.
//!
//! One table, single-statement upserts. Atomicity of `set_if_absent` comes
//! from `INSERT ... ON CONFLICT` taking over only expired rows.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use secrecy::ExposeSecret;
use tokio_postgres::NoTls;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::store::kv::KvStore;

/// Postgres-backed [`KvStore`].
pub struct PostgresKv {
    pool: Pool,
}

impl PostgresKv {
    /// Connect and verify the pool. Fails fast if the database is
    /// unreachable.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_ref()
            .ok_or_else(|| StoreError::Pool("DATABASE_URL is not set".to_string()))?;

        let mut cfg = Config::new();
        cfg.url = Some(url.expose_secret().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create the kv table if this is a fresh database.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS kv_entries (
                    key        TEXT PRIMARY KEY,
                    value      TEXT NOT NULL,
                    expires_at TIMESTAMPTZ
                )",
            )
            .await?;
        Ok(())
    }

    fn expiry(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64))
    }
}

#[async_trait]
impl KvStore for PostgresKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT value FROM kv_entries
                 WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
                &[&key],
            )
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        client
            .execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES ($1, $2, $3)
                 ON CONFLICT (key) DO UPDATE
                 SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
                &[&key, &value, &Self::expiry(ttl)],
            )
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        // The WHERE clause lets the insert take over expired rows only; a
        // live row leaves the statement with zero affected rows.
        let affected = client
            .execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES ($1, '1', $2)
                 ON CONFLICT (key) DO UPDATE
                 SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                 WHERE kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= now()",
                &[&key, &Self::expiry(Some(ttl))],
            )
            .await?;
        Ok(affected > 0)
    }
}

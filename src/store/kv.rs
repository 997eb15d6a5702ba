//! Key-value store abstraction.
//!
//! The cache, the dedup guard, and thread persistence all sit on this trait.
//! Correctness relies on the store's own atomicity (single-statement upserts
//! in Postgres, a single lock in memory), never on locks in the agent
//! process.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::StoreError;

/// Atomic get/set/set-with-expiry primitives over an external store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a live (non-expired) value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value, replacing any existing entry. `ttl: None` keeps the
    /// entry until overwritten.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomically record `key` unless a live entry already exists.
    ///
    /// Returns `true` when the key was absent (and is now marked for `ttl`).
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// In-memory store for tests and single-process development runs.
///
/// Suspended threads do not survive a restart with this backend; the binary
/// warns loudly when it falls back here.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(MemoryEntry::is_live) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: "1".to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let kv = MemoryKv::new();
        kv.put("k", "v", None).await.expect("put");
        assert_eq!(kv.get("k").await.expect("get"), Some("v".to_string()));
        assert_eq!(kv.get("missing").await.expect("get"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let kv = MemoryKv::new();
        kv.put("k", "v", Some(Duration::from_secs(60)))
            .await
            .expect("put");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(kv.get("k").await.expect("get"), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(kv.get("k").await.expect("get"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_marks_once_per_ttl_window() {
        let kv = MemoryKv::new();
        let ttl = Duration::from_secs(30);

        assert!(kv.set_if_absent("fp", ttl).await.expect("first"));
        assert!(!kv.set_if_absent("fp", ttl).await.expect("second"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(kv.set_if_absent("fp", ttl).await.expect("after expiry"));
    }
}

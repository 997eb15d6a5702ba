//! TTL-bound memoization of expensive tool calls.
//!
//! Two entries per cached operation: the raw result, keyed by the operation,
//! and its squashed summary, keyed by operation + a hash of the serialized
//! thread (the summary's wording depends on conversational context). Raw and
//! summary are written together or not at all. Store failures degrade to
//! cache misses; the cache is never load-bearing for correctness.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::llm::Summarizer;
use crate::store::KvStore;
use crate::tools::ToolFuture;

/// Sink for cache hit/miss accounting.
///
/// Injected at construction so the cache has no process-wide state; the
/// binary wires in a [`CacheStats`] and logs it on an interval.
pub trait CacheMetrics: Send + Sync {
    fn record_hit(&self);
    fn record_miss(&self);
}

/// Counter-backed metrics sink, periodically logged and reset.
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Log the current counters and start a fresh window.
    pub fn log_and_reset(&self) {
        let hits = self.hits.swap(0, Ordering::Relaxed);
        let misses = self.misses.swap(0, Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        };
        tracing::info!(hits, misses, hit_rate = format!("{hit_rate:.2}%"), "cache stats");
    }
}

impl CacheMetrics for CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Keyed memoization of tool results and their squashed summaries.
#[derive(Clone)]
pub struct ResultCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    metrics: Arc<dyn CacheMetrics>,
}

impl ResultCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration, metrics: Arc<dyn CacheMetrics>) -> Self {
        Self { kv, ttl, metrics }
    }

    /// Resolve an operation to its squashed text, consulting the cache when a
    /// key is given.
    ///
    /// `compute` is only polled on a raw-cache miss, so cached operations
    /// never re-execute their side effects. Operations without a cache key
    /// (anything consequential) always execute fresh.
    pub async fn fetch(
        &self,
        cache_key: Option<&str>,
        thread_prompt: &str,
        summarizer: &dyn Summarizer,
        compute: ToolFuture<'_>,
    ) -> Result<String, crate::error::ToolError> {
        let Some(key) = cache_key else {
            let result = compute.await?;
            let rendered = crate::thread::prompt::to_yaml(&result);
            return Ok(self.squash_or_raw(summarizer, thread_prompt, rendered).await);
        };

        let squash_key = format!("squash_{key}_{}", sha256_hex(thread_prompt));

        if let Some(raw) = self.kv_get(key).await {
            if let Some(summary) = self.kv_get(&squash_key).await {
                self.metrics.record_hit();
                return Ok(summary);
            }
            // The expensive call is cached but this conversation hasn't
            // squashed it yet; still a hit for the expensive part.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                self.metrics.record_hit();
                let rendered = crate::thread::prompt::to_yaml(&value);
                let summary = self.squash_or_raw(summarizer, thread_prompt, rendered).await;
                self.kv_put(&squash_key, &summary).await;
                return Ok(summary);
            }
            tracing::warn!(key, "discarding unparseable cache entry");
        }

        self.metrics.record_miss();
        let result = compute.await?;
        let rendered = crate::thread::prompt::to_yaml(&result);
        let summary = self.squash_or_raw(summarizer, thread_prompt, rendered).await;

        // Raw and summary land together or not at all.
        if self.kv_put_checked(key, &result.to_string()).await {
            self.kv_put(&squash_key, &summary).await;
        }

        Ok(summary)
    }

    async fn squash_or_raw(
        &self,
        summarizer: &dyn Summarizer,
        thread_prompt: &str,
        content: String,
    ) -> String {
        match summarizer.squash(thread_prompt, &content).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "squash failed, keeping raw tool output");
                content
            }
        }
    }

    async fn kv_get(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn kv_put(&self, key: &str, value: &str) {
        self.kv_put_checked(key, value).await;
    }

    async fn kv_put_checked(&self, key: &str, value: &str) -> bool {
        match self.kv.put(key, value, Some(self.ttl)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache write failed");
                false
            }
        }
    }
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

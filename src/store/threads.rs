//! Durable storage for in-flight threads.
//!
//! A thread is saved right before the control loop suspends for human input;
//! the returned state id travels through the approval transport and comes
//! back on the completion webhook. A secondary index maps the conversation
//! composite key to the latest state id so follow-up messages without a state
//! id can attach to the newest snapshot.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::StoreError;
use crate::store::kv::KvStore;
use crate::thread::Thread;

/// Thread persistence over a [`KvStore`].
#[derive(Clone)]
pub struct ThreadStore {
    kv: Arc<dyn KvStore>,
    /// Optional expiry for snapshots; `None` keeps suspended threads for as
    /// long as the store does.
    snapshot_ttl: Option<Duration>,
}

impl ThreadStore {
    pub fn new(kv: Arc<dyn KvStore>, snapshot_ttl: Option<Duration>) -> Self {
        Self { kv, snapshot_ttl }
    }

    /// Persist a snapshot and return its freshly generated state id.
    pub async fn save(&self, thread: &Thread) -> Result<String, StoreError> {
        let state_id = format!("thread_{}", Uuid::new_v4().simple());
        let json = serde_json::to_string(thread)?;
        self.kv.put(&state_id, &json, self.snapshot_ttl).await?;
        Ok(state_id)
    }

    /// Load a snapshot by state id.
    pub async fn load(&self, state_id: &str) -> Result<Thread, StoreError> {
        let json = self
            .kv
            .get(state_id)
            .await?
            .ok_or_else(|| StoreError::StateNotFound {
                state_id: state_id.to_string(),
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Point the conversation key at `state_id`, replacing any earlier
    /// binding.
    pub async fn bind_conversation(
        &self,
        conversation_key: &str,
        state_id: &str,
    ) -> Result<(), StoreError> {
        self.kv
            .put(
                &format!("conv:{conversation_key}"),
                state_id,
                self.snapshot_ttl,
            )
            .await
    }

    /// Latest state id for a conversation, if one is bound.
    pub async fn lookup_conversation(
        &self,
        conversation_key: &str,
    ) -> Result<Option<String>, StoreError> {
        self.kv.get(&format!("conv:{conversation_key}")).await
    }

    /// Save a snapshot and rebind its conversation key in one step.
    pub async fn checkpoint(&self, thread: &Thread) -> Result<String, StoreError> {
        let state_id = self.save(thread).await?;
        self.bind_conversation(&thread.conversation_key(), &state_id)
            .await?;
        Ok(state_id)
    }
}

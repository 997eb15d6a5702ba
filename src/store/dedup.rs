//! Best-effort rejection of redelivered inbound events.
//!
//! Webhook transports retry, and Slack redelivers events; the guard marks a
//! delivery fingerprint *before* processing begins so two near-simultaneous
//! deliveries cannot both pass. A crash between marking and finishing
//! processing drops that message — accepted tradeoff, bounded by the TTL.

use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::kv::KvStore;
use crate::thread::{EmailPayload, SlackThreadPayload};

/// TTL-bound seen-marker over a [`KvStore`].
#[derive(Clone)]
pub struct DedupGuard {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl DedupGuard {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Returns `true` when this fingerprint has not been seen within the TTL
    /// window, marking it seen as a side effect.
    pub async fn should_process(&self, fingerprint: &str) -> Result<bool, StoreError> {
        self.kv
            .set_if_absent(&format!("seen:{fingerprint}"), self.ttl)
            .await
    }
}

/// Fingerprint for an inbound email delivery.
pub fn email_fingerprint(email: &EmailPayload) -> String {
    format!("email:{}", email.message_id)
}

/// Fingerprint for an inbound Slack delivery.
///
/// Keyed on workspace + channel + message timestamp of the newest message, so
/// a retried delivery of the same message is rejected while a genuine
/// follow-up in the same thread passes.
pub fn slack_fingerprint(slack: &SlackThreadPayload) -> String {
    let last_ts = slack
        .events
        .last()
        .map(|m| m.message_ts.as_str())
        .unwrap_or(slack.thread_ts.as_str());
    format!(
        "slack:{}:{}:{}",
        slack.team_id.as_deref().unwrap_or("-"),
        slack.channel_id,
        last_ts
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKv;
    use crate::thread::SlackMessage;

    fn guard(ttl_secs: u64) -> DedupGuard {
        DedupGuard::new(Arc::new(MemoryKv::new()), Duration::from_secs(ttl_secs))
    }

    #[tokio::test]
    async fn second_delivery_with_same_fingerprint_is_rejected() {
        let guard = guard(60);
        assert!(guard.should_process("email:<m1>").await.expect("first"));
        assert!(!guard.should_process("email:<m1>").await.expect("second"));
        assert!(guard.should_process("email:<m2>").await.expect("other"));
    }

    #[tokio::test(start_paused = true)]
    async fn fingerprints_are_forgotten_after_the_ttl_window() {
        let guard = guard(30);
        assert!(guard.should_process("fp").await.expect("first"));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(guard.should_process("fp").await.expect("after ttl"));
    }

    #[test]
    fn slack_fingerprint_tracks_the_newest_message() {
        let slack = SlackThreadPayload {
            team_id: Some("T1".to_string()),
            channel_id: "C9".to_string(),
            thread_ts: "100.000".to_string(),
            events: vec![
                SlackMessage {
                    from_user_id: "U1".to_string(),
                    channel_id: "C9".to_string(),
                    content: "deploy?".to_string(),
                    message_ts: "100.000".to_string(),
                },
                SlackMessage {
                    from_user_id: "U1".to_string(),
                    channel_id: "C9".to_string(),
                    content: "actually yes".to_string(),
                    message_ts: "101.000".to_string(),
                },
            ],
        };
        assert_eq!(slack_fingerprint(&slack), "slack:T1:C9:101.000");
    }
}

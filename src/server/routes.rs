//! Webhook route handlers.
//!
//! Every inbound payload arrives on the same handler: signature check, then
//! dispatch by the payload's `type` tag. Handlers acknowledge immediately and
//! process asynchronously; failures after the ack are logged, never surfaced
//! to the delivering transport.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agent::{AgentRunner, CompletionEvent};
use crate::approvals::{FunctionCall, HumanContact};
use crate::config::InboundConfig;
use crate::llm::Planner;
use crate::server::signature;
use crate::store::{DedupGuard, ThreadStore, email_fingerprint, slack_fingerprint};
use crate::thread::{EmailPayload, Event, EventData, SlackThreadPayload, Thread, bare_address};

/// Sender used by the hosted transport's test deliveries.
const TEST_SENDER: &str = "overworked-admin@coolcompany.com";

/// Shared state for all webhook routes.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<AgentRunner>,
    pub planner: Arc<dyn Planner>,
    pub dedup: DedupGuard,
    pub threads: ThreadStore,
    pub inbound: InboundConfig,
    pub webhook_secret: Option<SecretString>,
    pub disable_webhook_verification: bool,
}

/// Build the full route table with state applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/webhook/generic", post(webhook_handler))
        .route("/webhook/new-email-thread", post(webhook_handler))
        .route(
            "/webhook/human-response-on-existing-thread",
            post(webhook_handler),
        )
        .fallback(not_found_handler)
        .with_state(state)
}

/// Inbound webhook payloads, tagged by delivery type.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WebhookPayload {
    #[serde(rename = "agent_email.received")]
    EmailReceived {
        #[serde(default)]
        is_test: bool,
        event: EmailPayload,
    },
    #[serde(rename = "agent_slack.received")]
    SlackReceived {
        #[serde(default)]
        is_test: bool,
        event: SlackThreadPayload,
    },
    #[serde(rename = "human_contact.completed")]
    HumanContactCompleted {
        #[serde(default)]
        is_test: bool,
        event: HumanContact,
    },
    #[serde(rename = "function_call.completed")]
    FunctionCallCompleted {
        #[serde(default)]
        is_test: bool,
        event: FunctionCall,
    },
}

async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !verify_delivery(&state, &headers, &body) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid webhook signature"})),
        );
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "unknown webhook type"})),
            );
        }
    };

    match payload {
        WebhookPayload::EmailReceived { is_test, event } => {
            handle_email(state, is_test, event).await
        }
        WebhookPayload::SlackReceived { is_test, event } => {
            handle_slack(state, is_test, event).await
        }
        WebhookPayload::HumanContactCompleted { event, .. } => {
            handle_completion(state, CompletionEvent::Contact(event))
        }
        WebhookPayload::FunctionCallCompleted { event, .. } => {
            handle_completion(state, CompletionEvent::FunctionCall(event))
        }
    }
}

fn verify_delivery(state: &AppState, headers: &HeaderMap, body: &[u8]) -> bool {
    if state.disable_webhook_verification {
        return true;
    }
    let Some(secret) = state.webhook_secret.as_ref() else {
        tracing::error!("no webhook signing secret configured, rejecting delivery");
        return false;
    };

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(msg_id), Some(timestamp), Some(signatures)) = (
        header("svix-id"),
        header("svix-timestamp"),
        header("svix-signature"),
    ) else {
        return false;
    };

    signature::verify(secret.expose_secret(), msg_id, timestamp, body, signatures)
}

async fn handle_email(
    state: AppState,
    is_test: bool,
    email: EmailPayload,
) -> (StatusCode, Json<Value>) {
    if is_test || email.from_address == TEST_SENDER {
        tracing::info!("test email received, skipping");
        return (StatusCode::OK, Json(json!({"status": "ok", "intent": "test"})));
    }

    let from = bare_address(&email.from_address);
    let to = bare_address(&email.to_address);

    if !sender_allowed(&state.inbound, from, to) {
        tracing::info!(from, to, "email outside allowlists, skipping");
        return (
            StatusCode::OK,
            Json(json!({"status": "ok", "intent": "ignored"})),
        );
    }

    if !passes_dedup(&state, &email_fingerprint(&email)).await {
        return (
            StatusCode::OK,
            Json(json!({"status": "ok", "intent": "duplicate"})),
        );
    }

    tracing::info!(from, to, "new email thread accepted");

    // Acknowledge now; everything else happens asynchronously.
    tokio::spawn(async move {
        let mut thread = Thread::from_email(email);
        if state.inbound.prefill_context {
            let steps = state.runner.default_prefill();
            state.runner.prefill_context(&mut thread, &steps).await;
        }
        if let Err(e) = state.runner.run(thread).await {
            tracing::error!(error = %e, "error processing new email thread");
        }
    });

    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn handle_slack(
    state: AppState,
    is_test: bool,
    slack: SlackThreadPayload,
) -> (StatusCode, Json<Value>) {
    if is_test {
        tracing::info!("test slack event received, skipping");
        return (StatusCode::OK, Json(json!({"status": "ok", "intent": "test"})));
    }

    if !passes_dedup(&state, &slack_fingerprint(&slack)).await {
        return (
            StatusCode::OK,
            Json(json!({"status": "ok", "intent": "duplicate"})),
        );
    }

    tracing::info!(channel = %slack.channel_id, "slack thread accepted");

    tokio::spawn(async move {
        let thread = locate_slack_thread(&state, slack).await;
        if let Err(e) = state.runner.run(thread).await {
            tracing::error!(error = %e, "error processing slack thread");
        }
    });

    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Attach a follow-up message to the newest snapshot of its conversation, or
/// open a fresh thread when none is bound.
async fn locate_slack_thread(state: &AppState, slack: SlackThreadPayload) -> Thread {
    let key = format!(
        "slack:{}:{}:{}",
        slack.team_id.as_deref().unwrap_or("-"),
        slack.channel_id,
        slack.thread_ts
    );

    if let Ok(Some(state_id)) = state.threads.lookup_conversation(&key).await {
        match state.threads.load(&state_id).await {
            Ok(mut thread) => {
                thread.append(Event {
                    kind: "slack_message_received".to_string(),
                    data: EventData::Slack(slack),
                });
                return thread;
            }
            Err(e) => {
                tracing::warn!(state_id, error = %e, "stale conversation binding, starting fresh");
            }
        }
    }

    Thread::from_slack(slack)
}

fn handle_completion(state: AppState, completion: CompletionEvent) -> (StatusCode, Json<Value>) {
    let has_state = match &completion {
        CompletionEvent::Contact(contact) => contact.spec.state.is_some(),
        CompletionEvent::FunctionCall(call) => call.spec.state.is_some(),
    };
    if !has_state {
        tracing::error!("received human response without state");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "error": "state is required"})),
        );
    }

    tokio::spawn(async move {
        if let Err(e) = state.runner.on_human_response(completion).await {
            // Includes the missing-snapshot case: logged and abandoned.
            tracing::error!(error = %e, "error processing human response");
        }
    });

    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn passes_dedup(state: &AppState, fingerprint: &str) -> bool {
    match state.dedup.should_process(fingerprint).await {
        Ok(fresh) => {
            if !fresh {
                tracing::info!(fingerprint, "duplicate delivery, skipping");
            }
            fresh
        }
        Err(e) => {
            // Fail open: a broken store should not silently drop mail.
            tracing::warn!(error = %e, "dedup store unavailable, processing anyway");
            true
        }
    }
}

fn sender_allowed(inbound: &InboundConfig, from: &str, to: &str) -> bool {
    if !inbound.allowed_source_emails.is_empty() && !inbound.allowed_source_emails.contains(from) {
        return false;
    }
    if !inbound.allowed_target_emails.is_empty() && !inbound.allowed_target_emails.contains(to) {
        return false;
    }
    true
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let canned = "<email_received>\nFrom: ops@example.com\nTo: bot@example.com\n\
                  Subject: make a ticket\nBody: make a ticket for austin to stock the fridges\n\
                  Previous Thread: []\n</email_received>";
    match state.planner.determine_next_step(canned).await {
        Ok(step) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "intent": step.intent_name()})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "error": e.to_string()})),
        ),
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "welcome": "to the greenlight agent",
        "instructions": "POST signed webhook deliveries to /webhook/generic",
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"status": "error", "message": "Not found"})),
    )
}

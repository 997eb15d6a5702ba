//! Error types for the agent.
//!
//! Each subsystem has its own error enum; the control loop converts tool and
//! summarizer failures into thread events instead of propagating them, so only
//! planner and store failures bubble out of a processing pass.

use thiserror::Error;

/// Errors loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {name}")]
    MissingVar { name: &'static str },

    #[error("invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

/// Errors from the planning and summarization LLM calls.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planner request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("planner authentication failed")]
    AuthFailed,

    #[error("planner rate limited")]
    RateLimited,

    #[error("invalid planner response: {reason}")]
    InvalidResponse { reason: String },
}

/// Errors from tool collaborators (tracker, deploys, forge, mailing list).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{provider} request failed: {reason}")]
    RequestFailed { provider: &'static str, reason: String },

    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: &'static str, reason: String },

    #[error("{provider} is not configured")]
    NotConfigured { provider: &'static str },
}

/// Errors from the human-approval transport.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval transport request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("approval transport rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Errors from the key-value store and thread persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store pool error: {0}")]
    Pool(String),

    #[error("store query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("failed to serialize thread state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no thread state found for {state_id}")]
    StateNotFound { state_id: String },

    #[error("completion arrived without a thread snapshot or state id")]
    MissingState,
}

/// Errors from the webhook server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },
}

/// Failure of a single asynchronous processing pass.
///
/// Tool failures never reach this level; they become `error` events on the
/// thread (see the control loop). What remains is the planner being
/// unreachable, the approval transport refusing a suspension, or persistence
/// failing underneath us.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

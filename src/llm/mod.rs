//! LLM integration: planning and summarization.
//!
//! The control loop only sees the two traits here. The concrete
//! implementation speaks an OpenAI-compatible chat completions API; swap it
//! out behind the traits for tests or other providers.

mod chat;

pub use chat::ChatLlm;

use async_trait::async_trait;

use crate::agent::intent::NextStep;
use crate::error::PlannerError;

/// Maps a serialized thread to the next structured step.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn determine_next_step(&self, prompt: &str) -> Result<NextStep, PlannerError>;
}

/// Compresses verbose tool output into planner-digestible text, conditioned
/// on the conversation so far.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn squash(&self, prompt: &str, new_content: &str) -> Result<String, PlannerError>;
}

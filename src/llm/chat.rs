//! OpenAI-compatible chat completions planner and summarizer.

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::agent::intent::{NextStep, parse_next_step};
use crate::config::LlmConfig;
use crate::error::PlannerError;
use crate::llm::{Planner, Summarizer};

use async_trait::async_trait;

const PLANNER_SYSTEM_PROMPT: &str = "\
You are an operations assistant working a conversation thread. The thread is \
a sequence of <event>...</event> blocks: the inbound message, your previous \
steps, tool results, errors, and human replies. Decide the single next step.

Respond with one JSON object and nothing else. The object always has an \
\"intent\" field, one of:
- done_for_now, request_more_information, nothing_to_do: {\"intent\", \"message\"}
- create_issue: {\"intent\", \"issue\": {\"title\", \"description\", \"team_id\", \"assignee_id\"?}}
- update_issue: {\"intent\", \"issue_id\", \"update\": {partial issue fields}}
- add_comment: {\"intent\", \"issue_id\", \"comment\", \"view_issue_url\"?}
- promote_deployment: {\"intent\", \"deployment\": {\"id\", \"commit_sha\", \"markdown\"}, \"previous_deployment\": {...}}
- push_tag: {\"intent\", \"tag\", \"commit_sha\"?}
- add_to_mailing_list: {\"intent\", \"email\", \"first_name\"?, \"last_name\"?, \"mailing_list_id\"}
- list_teams, list_users, list_projects, list_deployments, list_tags, list_mailing_lists: {\"intent\"}
- list_labels: {\"intent\", \"name_contains\"?}
- search_issues: {\"intent\", \"query\"}
- get_issue_comments: {\"intent\", \"issue_id\"}
- list_workflow_states: {\"intent\", \"team_id\"?}
- list_commits: {\"intent\", \"limit\"?}

Consequential actions (issue mutations, deployments, tags, mailing lists) are \
sent to a human for approval before execution; a denial comes back as a \
human_response event and is normal input, not an error.";

const SQUASH_SYSTEM_PROMPT: &str = "\
You compress tool output for an operations assistant. Given the conversation \
so far and a new piece of tool output, restate the output as short plain \
text keeping every identifier, URL, and number the next planning step could \
need. Respond with the compressed text only.";

/// Planner + summarizer over an OpenAI-compatible chat completions endpoint.
pub struct ChatLlm {
    client: Client,
    config: LlmConfig,
}

impl ChatLlm {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn complete(&self, model: &str, messages: Vec<Message>) -> Result<String, PlannerError> {
        let request = CompletionRequest {
            model: model.to_string(),
            messages,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(self.api_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| PlannerError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            if status.as_u16() == 401 {
                return Err(PlannerError::AuthFailed);
            }
            if status.as_u16() == 429 {
                return Err(PlannerError::RateLimited);
            }
            return Err(PlannerError::RequestFailed {
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| PlannerError::InvalidResponse {
                reason: format!("JSON parse error: {e}"),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PlannerError::InvalidResponse {
                reason: "no content in response".to_string(),
            })
    }
}

#[async_trait]
impl Planner for ChatLlm {
    async fn determine_next_step(&self, prompt: &str) -> Result<NextStep, PlannerError> {
        let content = self
            .complete(
                &self.config.model,
                vec![
                    Message::system(PLANNER_SYSTEM_PROMPT),
                    Message::user(prompt),
                ],
            )
            .await?;

        let value: serde_json::Value =
            serde_json::from_str(strip_code_fences(&content)).map_err(|e| {
                PlannerError::InvalidResponse {
                    reason: format!("planner did not return JSON: {e}"),
                }
            })?;

        Ok(parse_next_step(value))
    }
}

#[async_trait]
impl Summarizer for ChatLlm {
    async fn squash(&self, prompt: &str, new_content: &str) -> Result<String, PlannerError> {
        let user = format!(
            "Conversation so far:\n{prompt}\n\nNew tool output:\n{new_content}"
        );
        let content = self
            .complete(
                &self.config.squash_model,
                vec![Message::system(SQUASH_SYSTEM_PROMPT), Message::user(&user)],
            )
            .await?;
        Ok(content.trim().to_string())
    }
}

/// Trim a Markdown code fence off a model response, if present.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// Chat completions wire types.

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

impl Message {
    fn system(content: &str) -> Self {
        Self {
            role: "system",
            content: content.to_string(),
        }
    }

    fn user(content: &str) -> Self {
        Self {
            role: "user",
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

//! Issue tracker client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::agent::intent::{IssueDraft, IssuePatch};
use crate::config::TrackerConfig;
use crate::error::ToolError;

const PROVIDER: &str = "tracker";

/// Narrow view of the issue tracker the agent needs.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn list_teams(&self) -> Result<Value, ToolError>;
    async fn list_users(&self) -> Result<Value, ToolError>;
    async fn list_projects(&self) -> Result<Value, ToolError>;
    async fn list_labels(&self, name_contains: Option<&str>) -> Result<Value, ToolError>;
    async fn search_issues(&self, query: &str) -> Result<Value, ToolError>;
    async fn get_issue_comments(&self, issue_id: &str) -> Result<Value, ToolError>;
    async fn list_workflow_states(&self, team_id: Option<&str>) -> Result<Value, ToolError>;
    async fn create_issue(&self, draft: &IssueDraft) -> Result<Value, ToolError>;
    async fn update_issue(&self, issue_id: &str, patch: &IssuePatch) -> Result<Value, ToolError>;
    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<Value, ToolError>;
}

/// HTTP implementation against the tracker's REST API.
pub struct HttpTrackerClient {
    client: Client,
    config: TrackerConfig,
}

impl HttpTrackerClient {
    pub fn new(config: TrackerConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
        let response = request
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| ToolError::RequestFailed {
                provider: PROVIDER,
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ToolError::RequestFailed {
                provider: PROVIDER,
                reason: format!("HTTP {status}: {body}"),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| ToolError::InvalidResponse {
            provider: PROVIDER,
            reason: format!("JSON parse error: {e}"),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ToolError> {
        self.send(self.client.get(self.api_url(path)).query(query))
            .await
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn list_teams(&self) -> Result<Value, ToolError> {
        self.get("teams", &[]).await
    }

    async fn list_users(&self) -> Result<Value, ToolError> {
        self.get("users", &[]).await
    }

    async fn list_projects(&self) -> Result<Value, ToolError> {
        self.get("projects", &[]).await
    }

    async fn list_labels(&self, name_contains: Option<&str>) -> Result<Value, ToolError> {
        let mut query = Vec::new();
        if let Some(fragment) = name_contains {
            query.push(("name_contains", fragment));
        }
        self.get("labels", &query).await
    }

    async fn search_issues(&self, query: &str) -> Result<Value, ToolError> {
        self.get("issues/search", &[("query", query)]).await
    }

    async fn get_issue_comments(&self, issue_id: &str) -> Result<Value, ToolError> {
        self.get(&format!("issues/{issue_id}/comments"), &[]).await
    }

    async fn list_workflow_states(&self, team_id: Option<&str>) -> Result<Value, ToolError> {
        let mut query = Vec::new();
        if let Some(team_id) = team_id {
            query.push(("team_id", team_id));
        }
        self.get("workflow_states", &query).await
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<Value, ToolError> {
        self.send(self.client.post(self.api_url("issues")).json(draft))
            .await
    }

    async fn update_issue(&self, issue_id: &str, patch: &IssuePatch) -> Result<Value, ToolError> {
        self.send(
            self.client
                .patch(self.api_url(&format!("issues/{issue_id}")))
                .json(patch),
        )
        .await
    }

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<Value, ToolError> {
        self.send(
            self.client
                .post(self.api_url(&format!("issues/{issue_id}/comments")))
                .json(&json!({ "body": body })),
        )
        .await
    }
}

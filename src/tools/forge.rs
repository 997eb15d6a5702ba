//! Git forge client: commits, tags, and workflow dispatch.
//!
//! Promotion of an approved deployment happens by dispatching the configured
//! workflow rather than calling the deployment platform directly, so the
//! forge owns the actual production mutation.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::ForgeConfig;
use crate::error::ToolError;

const PROVIDER: &str = "forge";

/// Narrow view of the git forge.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn list_commits(&self, limit: u32) -> Result<Value, ToolError>;
    async fn list_tags(&self) -> Result<Value, ToolError>;
    /// Create a lightweight tag. Without an explicit sha the head of the
    /// default branch is tagged.
    async fn push_tag(&self, tag: &str, commit_sha: Option<&str>) -> Result<Value, ToolError>;
    /// Dispatch a workflow file on a ref with the given inputs.
    async fn trigger_workflow_dispatch(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: Value,
    ) -> Result<Value, ToolError>;
}

/// HTTP implementation against a GitHub-style REST API.
pub struct HttpForgeClient {
    client: Client,
    config: ForgeConfig,
}

impl HttpForgeClient {
    pub fn new(config: ForgeConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("greenlight-agent")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
        let response = request
            .header(
                "Authorization",
                format!("Bearer {}", self.config.token.expose_secret()),
            )
            .header("Accept", "application/vnd.github+json")
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

    /// Sha of the default branch head.
    async fn head_sha(&self) -> Result<String, ToolError> {
        let commit = self
            .send(self.client.get(self.repo_url("commits/main")))
            .await?;
        commit
            .get("sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidResponse {
                provider: PROVIDER,
                reason: "head commit has no sha".to_string(),
            })
    }
}

#[async_trait]
impl ForgeClient for HttpForgeClient {
    async fn list_commits(&self, limit: u32) -> Result<Value, ToolError> {
        let commits = self
            .send(
                self.client
                    .get(self.repo_url("commits"))
                    .query(&[("per_page", limit.to_string().as_str()), ("sha", "main")]),
            )
            .await?;

        let commits: Vec<WireCommit> =
            serde_json::from_value(commits).map_err(|e| ToolError::InvalidResponse {
                provider: PROVIDER,
                reason: format!("unexpected commit listing: {e}"),
            })?;

        Ok(Value::Array(
            commits.into_iter().map(WireCommit::into_summary).collect(),
        ))
    }

    async fn list_tags(&self) -> Result<Value, ToolError> {
        self.send(self.client.get(self.repo_url("tags"))).await
    }

    async fn push_tag(&self, tag: &str, commit_sha: Option<&str>) -> Result<Value, ToolError> {
        let sha = match commit_sha {
            Some(sha) => sha.to_string(),
            None => self.head_sha().await?,
        };

        self.send(self.client.post(self.repo_url("git/refs")).json(&json!({
            "ref": format!("refs/tags/{tag}"),
            "sha": sha,
        })))
        .await?;

        Ok(json!({ "tag": tag, "sha": sha, "status": "created" }))
    }

    async fn trigger_workflow_dispatch(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: Value,
    ) -> Result<Value, ToolError> {
        self.send(
            self.client
                .post(self.repo_url(&format!("actions/workflows/{workflow}/dispatches")))
                .json(&json!({ "ref": git_ref, "inputs": inputs })),
        )
        .await?;

        // Dispatch returns an empty body; report what was asked for.
        Ok(json!({
            "workflow": workflow,
            "ref": git_ref,
            "status": "dispatched",
        }))
    }
}

#[derive(Debug, Deserialize)]
struct WireCommit {
    sha: String,
    html_url: Option<String>,
    commit: WireCommitDetail,
}

#[derive(Debug, Deserialize)]
struct WireCommitDetail {
    message: String,
    author: Option<WireCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct WireCommitAuthor {
    name: Option<String>,
    date: Option<String>,
}

impl WireCommit {
    fn into_summary(self) -> Value {
        let author = self.commit.author.unwrap_or(WireCommitAuthor {
            name: None,
            date: None,
        });
        json!({
            "sha": self.sha,
            "message": self.commit.message.lines().next().unwrap_or_default(),
            "author": author.name,
            "date": author.date,
            "url": self.html_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_summaries_keep_only_the_subject_line() {
        let wire: Vec<WireCommit> = serde_json::from_value(json!([{
            "sha": "abc123",
            "html_url": "https://forge.example/c/abc123",
            "commit": {
                "message": "fix sensor\n\nlong body here",
                "author": { "name": "dex", "date": "2026-08-01T12:00:00Z" }
            }
        }]))
        .expect("wire parse");

        let summary = wire
            .into_iter()
            .map(WireCommit::into_summary)
            .collect::<Vec<_>>();
        assert_eq!(summary[0]["message"], "fix sensor");
        assert_eq!(summary[0]["author"], "dex");
    }
}

//! Deployment platform client.
//!
//! Lists recent deployments for the configured project and reduces the wire
//! payload to the handful of fields the planner can act on: which deployment
//! currently serves production, and what could be promoted.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::DeployConfig;
use crate::error::ToolError;

const PROVIDER: &str = "deploys";

/// How many recent deployments the summary keeps.
const RECENT_LIMIT: usize = 10;

/// Narrow view of the deployment platform.
#[async_trait]
pub trait DeployClient: Send + Sync {
    /// Current production deployment plus the most recent candidates.
    async fn list_deployments(&self) -> Result<Value, ToolError>;
}

/// HTTP implementation against the platform's deployments API.
pub struct HttpDeployClient {
    client: Client,
    config: DeployConfig,
}

impl HttpDeployClient {
    pub fn new(config: DeployConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }
}

#[async_trait]
impl DeployClient for HttpDeployClient {
    async fn list_deployments(&self) -> Result<Value, ToolError> {
        let url = format!(
            "{}/v6/deployments",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("teamId", self.config.team_id.as_str()),
                ("projectId", self.config.project_id.as_str()),
                ("limit", "100"),
            ])
            .header(
                "Authorization",
                format!("Bearer {}", self.config.token.expose_secret()),
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

        let listing: DeploymentListing =
            serde_json::from_str(&body).map_err(|e| ToolError::InvalidResponse {
                provider: PROVIDER,
                reason: format!("JSON parse error: {e}"),
            })?;

        Ok(summarize_deployments(
            listing.deployments,
            &self.config.team_id,
            &self.config.project_id,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentListing {
    deployments: Vec<WireDeployment>,
}

#[derive(Debug, Deserialize)]
struct WireDeployment {
    uid: String,
    url: String,
    created: i64,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default, alias = "readyState")]
    ready_state: Option<String>,
    #[serde(default, alias = "readySubstate")]
    ready_substate: Option<String>,
    #[serde(default)]
    meta: WireDeploymentMeta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDeploymentMeta {
    #[serde(default, alias = "githubCommitSha")]
    commit_sha: Option<String>,
    #[serde(default, alias = "githubCommitRef")]
    commit_ref: Option<String>,
    #[serde(default, alias = "githubCommitAuthorLogin")]
    commit_author: Option<String>,
    #[serde(default, alias = "githubCommitMessage")]
    commit_message: Option<String>,
}

/// Reduce the raw listing to production deployments, newest first, with the
/// currently promoted one pulled out.
fn summarize_deployments(
    mut deployments: Vec<WireDeployment>,
    team_id: &str,
    project_id: &str,
) -> Value {
    deployments.sort_by_key(|d| std::cmp::Reverse(d.created));
    deployments.retain(|d| d.target.as_deref() == Some("production"));

    let entries: Vec<Value> = deployments
        .iter()
        .map(|d| deployment_entry(d, team_id, project_id))
        .collect();

    let current = deployments
        .iter()
        .find(|d| d.ready_substate.as_deref() == Some("PROMOTED"))
        .map(|d| deployment_entry(d, team_id, project_id))
        .unwrap_or(Value::Null);

    json!({
        "current_deployment": current,
        "recent_deployments": entries.into_iter().take(RECENT_LIMIT).collect::<Vec<_>>(),
    })
}

fn deployment_entry(deployment: &WireDeployment, team_id: &str, project_id: &str) -> Value {
    let uid = deployment
        .uid
        .strip_prefix("dpl_")
        .unwrap_or(&deployment.uid);
    json!({
        "id": deployment.uid,
        "preview_url": deployment.url,
        "created_at": deployment.created,
        "state": deployment.state,
        "ready_state": deployment.ready_state,
        "ready_substate": deployment.ready_substate,
        "commit_sha": deployment.meta.commit_sha.as_deref().map(|sha| &sha[..sha.len().min(7)]),
        "commit_ref": deployment.meta.commit_ref,
        "commit_author": deployment.meta.commit_author,
        "commit_message": deployment
            .meta
            .commit_message
            .as_deref()
            .map(|m| m.chars().take(60).collect::<String>()),
        "dashboard_url": format!("https://vercel.com/{team_id}/{project_id}/{uid}"),
    })
}

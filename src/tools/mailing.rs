//! Mailing list client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};

use crate::config::MailingConfig;
use crate::error::ToolError;

const PROVIDER: &str = "mailing";

/// Narrow view of the mailing-list service.
#[async_trait]
pub trait MailingListClient: Send + Sync {
    async fn list_mailing_lists(&self) -> Result<Value, ToolError>;
    async fn add_contact(
        &self,
        email: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        mailing_list_id: &str,
    ) -> Result<Value, ToolError>;
}

/// HTTP implementation against the service's REST API.
pub struct HttpMailingListClient {
    client: Client,
    config: MailingConfig,
}

impl HttpMailingListClient {
    pub fn new(config: MailingConfig) -> Self {
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

        serde_json::from_str(&body).map_err(|e| ToolError::InvalidResponse {
            provider: PROVIDER,
            reason: format!("JSON parse error: {e}"),
        })
    }
}

#[async_trait]
impl MailingListClient for HttpMailingListClient {
    async fn list_mailing_lists(&self) -> Result<Value, ToolError> {
        self.send(self.client.get(self.api_url("lists"))).await
    }

    async fn add_contact(
        &self,
        email: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        mailing_list_id: &str,
    ) -> Result<Value, ToolError> {
        let mut lists = Map::new();
        lists.insert(mailing_list_id.to_string(), Value::Bool(true));

        self.send(self.client.post(self.api_url("contacts/create")).json(&json!({
            "email": email,
            "firstName": first_name,
            "lastName": last_name,
            "mailingLists": lists,
        })))
        .await
    }
}

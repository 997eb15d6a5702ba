//! HTTP client for the approval transport.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;
use uuid::Uuid;

use crate::approvals::{
    ApprovalTransport, ContactChannel, FunctionCallSpec, HumanContactSpec,
};
use crate::config::ApprovalConfig;
use crate::error::ApprovalError;

/// Client for the hosted approval service.
pub struct HttpApprovalClient {
    client: Client,
    config: ApprovalConfig,
}

impl HttpApprovalClient {
    pub fn new(config: ApprovalConfig) -> Self {
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

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), ApprovalError> {
        let response = self
            .client
            .post(self.api_url(path))
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| ApprovalError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApprovalError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct FunctionCallBody<'a> {
    call_id: String,
    spec: FunctionCallWire<'a>,
}

#[derive(Serialize)]
struct FunctionCallWire<'a> {
    #[serde(flatten)]
    spec: FunctionCallSpec,
    channel: &'a ContactChannel,
}

#[derive(Serialize)]
struct HumanContactBody<'a> {
    call_id: String,
    spec: HumanContactWire<'a>,
}

#[derive(Serialize)]
struct HumanContactWire<'a> {
    #[serde(flatten)]
    spec: HumanContactSpec,
    channel: &'a ContactChannel,
}

#[async_trait]
impl ApprovalTransport for HttpApprovalClient {
    async fn create_function_call(
        &self,
        channel: &ContactChannel,
        spec: FunctionCallSpec,
    ) -> Result<(), ApprovalError> {
        tracing::info!(function = %spec.name, "submitting function call for approval");
        self.post(
            "function_calls",
            &FunctionCallBody {
                call_id: Uuid::new_v4().simple().to_string(),
                spec: FunctionCallWire { spec, channel },
            },
        )
        .await
    }

    async fn create_human_contact(
        &self,
        channel: &ContactChannel,
        spec: HumanContactSpec,
    ) -> Result<(), ApprovalError> {
        tracing::info!("submitting human contact");
        self.post(
            "contact_requests",
            &HumanContactBody {
                call_id: Uuid::new_v4().simple().to_string(),
                spec: HumanContactWire { spec, channel },
            },
        )
        .await
    }
}

//! Human-approval transport.
//!
//! Consequential intents are never executed directly: the loop submits a
//! typed function-call spec here, suspends, and a completion webhook later
//! delivers the human's decision together with the thread snapshot reference
//! attached at suspension time. Terminal-conversational intents go through
//! the same transport as human contacts.

mod client;

pub use client::HttpApprovalClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApprovalError;
use crate::agent::intent::{IssueDraft, IssuePatch};
use crate::thread::{Origin, Thread, bare_address};

/// Operation-specific parameters submitted for approval.
///
/// One variant per consequential intent, carrying exactly the fields that
/// operation needs; serialized uniformly as `{"fn": ..., "kwargs": {...}}`
/// at the transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fn", content = "kwargs", rename_all = "snake_case")]
pub enum ApprovalCall {
    CreateIssue {
        issue: IssueDraft,
    },
    UpdateIssue {
        issue_id: String,
        update: IssuePatch,
    },
    AddComment {
        issue_id: String,
        comment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view_issue_url: Option<String>,
    },
    PromoteDeployment {
        deployment_id: String,
        commit_sha: String,
        new_deployment: String,
        previous_deployment: String,
    },
    PushTag {
        tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_sha: Option<String>,
    },
    AddToMailingList {
        email: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_name: Option<String>,
        mailing_list_id: String,
    },
}

impl ApprovalCall {
    /// The wire-level function name.
    pub fn name(&self) -> &'static str {
        match self {
            ApprovalCall::CreateIssue { .. } => "create_issue",
            ApprovalCall::UpdateIssue { .. } => "update_issue",
            ApprovalCall::AddComment { .. } => "add_comment",
            ApprovalCall::PromoteDeployment { .. } => "promote_deployment",
            ApprovalCall::PushTag { .. } => "push_tag",
            ApprovalCall::AddToMailingList { .. } => "add_to_mailing_list",
        }
    }
}

/// Reference to the thread snapshot attached to a suspension.
///
/// Usually an opaque state id pointing into the thread store; transports
/// with generous payload ceilings may echo the full thread inline instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateRef {
    Inline(Box<Thread>),
    Id(String),
}

/// Wire form of a function call: name, kwargs, and the snapshot reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallSpec {
    #[serde(rename = "fn")]
    pub name: String,
    pub kwargs: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateRef>,
}

impl FunctionCallSpec {
    pub fn new(call: &ApprovalCall, state: StateRef) -> Self {
        let value = serde_json::to_value(call).unwrap_or(serde_json::Value::Null);
        Self {
            name: call.name().to_string(),
            kwargs: value
                .get("kwargs")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            state: Some(state),
        }
    }

    /// Reassemble the typed call, or `None` for function names this build
    /// does not recognize.
    pub fn to_call(&self) -> Option<ApprovalCall> {
        serde_json::from_value(serde_json::json!({
            "fn": self.name,
            "kwargs": self.kwargs,
        }))
        .ok()
    }
}

/// Wire form of a human contact: the message and the snapshot reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanContactSpec {
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateRef>,
}

/// Channel a human is reached on, derived from the thread origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactChannel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackChannel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailChannel {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackChannel {
    pub channel_or_user_id: String,
    pub slack_blocks: bool,
}

impl ContactChannel {
    /// Reply channel for a thread: email replies thread into the original
    /// message, Slack replies land in the originating channel.
    pub fn for_origin(origin: &Origin) -> Self {
        match origin {
            Origin::Email(email) => Self {
                email: Some(EmailChannel {
                    address: bare_address(&email.from_address).to_string(),
                    subject: reply_subject(&email.subject),
                    in_reply_to_message_id: Some(email.message_id.clone()),
                    references_message_id: Some(email.message_id.clone()),
                }),
                slack: None,
            },
            Origin::Slack(slack) => Self {
                email: None,
                slack: Some(SlackChannel {
                    channel_or_user_id: slack.channel_id.clone(),
                    slack_blocks: true,
                }),
            },
        }
    }
}

fn reply_subject(subject: &str) -> Option<String> {
    if subject.is_empty() {
        return None;
    }
    if subject.starts_with("Re:") {
        Some(subject.to_string())
    } else {
        Some(format!("Re: {subject}"))
    }
}

/// A completed human contact, delivered by webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanContact {
    pub spec: HumanContactSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HumanContactStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanContactStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// A completed function call (approve/deny), delivered by webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub spec: FunctionCallSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FunctionCallStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Outbound side of the approval transport. Completion always arrives later
/// via webhook, never as a return value.
#[async_trait]
pub trait ApprovalTransport: Send + Sync {
    async fn create_function_call(
        &self,
        channel: &ContactChannel,
        spec: FunctionCallSpec,
    ) -> Result<(), ApprovalError>;

    async fn create_human_contact(
        &self,
        channel: &ContactChannel,
        spec: HumanContactSpec,
    ) -> Result<(), ApprovalError>;
}

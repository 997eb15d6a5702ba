//! Append-only conversation threads.
//!
//! A [`Thread`] ties one inbound trigger (email or Slack message) to every
//! planning, tool, and human-interaction event that follows. Events are only
//! ever appended; the serialized thread is the unit of persisted state handed
//! across the human-approval suspension boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::intent::NextStep;

pub mod prompt;

/// Reduce a `Name <addr>` form to the bare address.
pub fn bare_address(raw: &str) -> &str {
    match (raw.find('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => raw[start + 1..end].trim(),
        _ => raw.trim(),
    }
}

/// Inbound email payload, as delivered by the inbound-email webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub body: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_thread: Vec<EmailMessage>,
}

/// A message from an earlier email exchange, carried for planner context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from_address: String,
    pub to_address: Vec<String>,
    pub subject: String,
    pub content: String,
    pub datetime: String,
}

/// One message within an inbound Slack thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackMessage {
    pub from_user_id: String,
    pub channel_id: String,
    pub content: String,
    pub message_ts: String,
}

/// Inbound Slack thread payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackThreadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub channel_id: String,
    pub thread_ts: String,
    pub events: Vec<SlackMessage>,
}

/// Where a thread originated. Determines which human-contact channel the
/// escalation path uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Email(EmailPayload),
    Slack(SlackThreadPayload),
}

impl Origin {
    /// Composite key locating the conversation this thread belongs to.
    ///
    /// Overwritten in the store on each inbound message so follow-ups always
    /// attach to the latest snapshot.
    pub fn conversation_key(&self) -> String {
        match self {
            Origin::Email(email) => format!("email:{}", email.message_id),
            Origin::Slack(slack) => format!(
                "slack:{}:{}:{}",
                slack.team_id.as_deref().unwrap_or("-"),
                slack.channel_id,
                slack.thread_ts
            ),
        }
    }
}

/// Payload of a single thread event.
///
/// The event kind fully determines which variant is carried; no event has an
/// ambiguous payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    /// A planner-produced intent, announced under its own name.
    Step(NextStep),
    /// The raw inbound email that opened the thread.
    Email(EmailPayload),
    /// An inbound Slack thread (initial or follow-up message).
    Slack(SlackThreadPayload),
    /// Squashed tool output, an error diagnostic, or a human reply.
    Text(String),
}

/// A single entry in a thread's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

impl Event {
    /// Plain-text event (tool results, errors, human replies).
    pub fn text(kind: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: EventData::Text(body.into()),
        }
    }

    /// Intent-announcement event, tagged with the intent's own name.
    pub fn step(step: NextStep) -> Self {
        Self {
            kind: step.intent_name().to_string(),
            data: EventData::Step(step),
        }
    }
}

/// The append-only event log for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Correlation id for logging; not required to be stable across restarts.
    pub id: String,
    pub origin: Origin,
    events: Vec<Event>,
}

impl Thread {
    /// Open a thread from an inbound email.
    pub fn from_email(email: EmailPayload) -> Self {
        let first = Event {
            kind: "email_received".to_string(),
            data: EventData::Email(email.clone()),
        };
        Self {
            id: Uuid::new_v4().simple().to_string(),
            origin: Origin::Email(email),
            events: vec![first],
        }
    }

    /// Open a thread from an inbound Slack message.
    pub fn from_slack(slack: SlackThreadPayload) -> Self {
        let first = Event {
            kind: "slack_message_received".to_string(),
            data: EventData::Slack(slack.clone()),
        };
        Self {
            id: Uuid::new_v4().simple().to_string(),
            origin: Origin::Slack(slack),
            events: vec![first],
        }
    }

    /// The full event log, in append order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The most recently appended event.
    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Append an event. This is the only way the log grows; existing entries
    /// are never touched.
    pub fn append(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Composite key for the conversation this thread belongs to.
    pub fn conversation_key(&self) -> String {
        self.origin.conversation_key()
    }
}

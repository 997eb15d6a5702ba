//! Planner-produced next steps.
//!
//! The planner returns a closed tagged union: every intent the agent can act
//! on is a variant here, plus one explicit [`NextStep::Unrecognized`] variant
//! for names this build has no handler for. Dispatch matches exhaustively on
//! the enum, so a newly added intent fails to compile until every call site
//! handles it.

use serde::{Deserialize, Serialize};

/// Fields of an issue the planner wants created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub description: String,
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
}

/// Partial update to an existing issue. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// A deployment the planner is referring to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRef {
    pub id: String,
    pub commit_sha: String,
    /// Human-readable one-line description, rendered into approval requests.
    pub markdown: String,
}

/// How the control loop must treat an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepClass {
    /// Ends the loop and awaits a free-text human reply.
    Terminal,
    /// Must be approved by a human before any side effect occurs.
    Consequential,
    /// Safe to execute immediately; result appended automatically.
    ReadOnly,
    /// The planner named an intent this build has no handler for.
    Unrecognized,
}

/// The planner's decision about what to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum NextStep {
    // Terminal-conversational.
    DoneForNow { message: String },
    RequestMoreInformation { message: String },
    NothingToDo { message: String },

    // Consequential: gated behind human approval.
    CreateIssue { issue: IssueDraft },
    UpdateIssue { issue_id: String, update: IssuePatch },
    AddComment {
        issue_id: String,
        comment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        view_issue_url: Option<String>,
    },
    PromoteDeployment {
        deployment: DeploymentRef,
        previous_deployment: DeploymentRef,
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

    // Read-only: auto-executed, results cached where a key makes sense.
    ListTeams,
    ListUsers,
    ListProjects,
    ListLabels {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name_contains: Option<String>,
    },
    SearchIssues { query: String },
    GetIssueComments { issue_id: String },
    ListWorkflowStates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team_id: Option<String>,
    },
    ListDeployments,
    ListCommits {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    ListTags,
    ListMailingLists,

    /// Catch-all for intent names with no handler. Produced by
    /// [`parse_next_step`], never by hand.
    Unrecognized { name: String },
}

impl NextStep {
    /// The snake_case intent name, as used for event kinds and logging.
    pub fn intent_name(&self) -> &str {
        match self {
            NextStep::DoneForNow { .. } => "done_for_now",
            NextStep::RequestMoreInformation { .. } => "request_more_information",
            NextStep::NothingToDo { .. } => "nothing_to_do",
            NextStep::CreateIssue { .. } => "create_issue",
            NextStep::UpdateIssue { .. } => "update_issue",
            NextStep::AddComment { .. } => "add_comment",
            NextStep::PromoteDeployment { .. } => "promote_deployment",
            NextStep::PushTag { .. } => "push_tag",
            NextStep::AddToMailingList { .. } => "add_to_mailing_list",
            NextStep::ListTeams => "list_teams",
            NextStep::ListUsers => "list_users",
            NextStep::ListProjects => "list_projects",
            NextStep::ListLabels { .. } => "list_labels",
            NextStep::SearchIssues { .. } => "search_issues",
            NextStep::GetIssueComments { .. } => "get_issue_comments",
            NextStep::ListWorkflowStates { .. } => "list_workflow_states",
            NextStep::ListDeployments => "list_deployments",
            NextStep::ListCommits { .. } => "list_commits",
            NextStep::ListTags => "list_tags",
            NextStep::ListMailingLists => "list_mailing_lists",
            NextStep::Unrecognized { name } => name,
        }
    }

    /// The human-facing message of a terminal-conversational step.
    pub fn terminal_message(&self) -> Option<&str> {
        match self {
            NextStep::DoneForNow { message }
            | NextStep::RequestMoreInformation { message }
            | NextStep::NothingToDo { message } => Some(message),
            _ => None,
        }
    }

    /// The fixed intent-name → dispatch-class mapping.
    pub fn class(&self) -> StepClass {
        match self {
            NextStep::DoneForNow { .. }
            | NextStep::RequestMoreInformation { .. }
            | NextStep::NothingToDo { .. } => StepClass::Terminal,

            NextStep::CreateIssue { .. }
            | NextStep::UpdateIssue { .. }
            | NextStep::AddComment { .. }
            | NextStep::PromoteDeployment { .. }
            | NextStep::PushTag { .. }
            | NextStep::AddToMailingList { .. } => StepClass::Consequential,

            NextStep::ListTeams
            | NextStep::ListUsers
            | NextStep::ListProjects
            | NextStep::ListLabels { .. }
            | NextStep::SearchIssues { .. }
            | NextStep::GetIssueComments { .. }
            | NextStep::ListWorkflowStates { .. }
            | NextStep::ListDeployments
            | NextStep::ListCommits { .. }
            | NextStep::ListTags
            | NextStep::ListMailingLists => StepClass::ReadOnly,

            NextStep::Unrecognized { .. } => StepClass::Unrecognized,
        }
    }
}

/// Result-event kind for a given intent kind, or `None` when the intent has
/// no result mapping (terminal intents, or bookkeeping gone wrong).
pub fn result_event_kind(intent_kind: &str) -> Option<String> {
    const MAPPED: &[&str] = &[
        "create_issue",
        "update_issue",
        "add_comment",
        "promote_deployment",
        "push_tag",
        "add_to_mailing_list",
        "list_teams",
        "list_users",
        "list_projects",
        "list_labels",
        "search_issues",
        "get_issue_comments",
        "list_workflow_states",
        "list_deployments",
        "list_commits",
        "list_tags",
        "list_mailing_lists",
    ];
    MAPPED
        .contains(&intent_kind)
        .then(|| format!("{intent_kind}_result"))
}

/// Parse a planner response into a [`NextStep`].
///
/// An unknown intent name (or a known name with a malformed payload) becomes
/// [`NextStep::Unrecognized`] carrying the offending name, so the control
/// loop can surface a diagnostic instead of erroring out.
pub fn parse_next_step(value: serde_json::Value) -> NextStep {
    let name = value
        .get("intent")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("(missing intent)")
        .to_string();
    serde_json::from_value(value).unwrap_or(NextStep::Unrecognized { name })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_intents_parse_into_typed_variants() {
        let step = parse_next_step(json!({
            "intent": "create_issue",
            "issue": {
                "title": "Stock the fridges",
                "description": "We are out of sparkling water.",
                "team_id": "TEAM-1"
            }
        }));
        match step {
            NextStep::CreateIssue { issue } => {
                assert_eq!(issue.title, "Stock the fridges");
                assert_eq!(issue.assignee_id, None);
            }
            other => panic!("expected create_issue, got {other:?}"),
        }
    }

    #[test]
    fn unknown_intent_becomes_unrecognized_with_name() {
        let step = parse_next_step(json!({"intent": "frobnicate", "target": "x"}));
        assert_eq!(
            step,
            NextStep::Unrecognized {
                name: "frobnicate".to_string()
            }
        );
        assert_eq!(step.class(), StepClass::Unrecognized);
    }

    #[test]
    fn malformed_known_intent_is_unrecognized_under_its_own_name() {
        // create_issue without its payload is a planner contract violation.
        let step = parse_next_step(json!({"intent": "create_issue"}));
        assert_eq!(
            step,
            NextStep::Unrecognized {
                name: "create_issue".to_string()
            }
        );
    }

    #[test]
    fn intent_names_round_trip_through_serde_tags() {
        let steps = vec![
            NextStep::DoneForNow {
                message: "all set".to_string(),
            },
            NextStep::ListTeams,
            NextStep::SearchIssues {
                query: "fridge".to_string(),
            },
            NextStep::PushTag {
                tag: "v1.2.3".to_string(),
                commit_sha: None,
            },
        ];
        for step in steps {
            let value = serde_json::to_value(&step).expect("serialize");
            assert_eq!(value["intent"], step.intent_name());
            assert_eq!(parse_next_step(value), step);
        }
    }

    #[test]
    fn every_class_has_a_result_mapping_policy() {
        // Read-only and consequential intents map to `<intent>_result`;
        // terminal intents never produce results.
        assert_eq!(
            result_event_kind("list_deployments").as_deref(),
            Some("list_deployments_result")
        );
        assert_eq!(
            result_event_kind("create_issue").as_deref(),
            Some("create_issue_result")
        );
        assert_eq!(result_event_kind("done_for_now"), None);
        assert_eq!(result_event_kind("email_received"), None);
    }

    #[test]
    fn dispatch_classes_match_the_fixed_table() {
        let terminal = [
            NextStep::DoneForNow { message: String::new() },
            NextStep::RequestMoreInformation { message: String::new() },
            NextStep::NothingToDo { message: String::new() },
        ];
        for step in &terminal {
            assert_eq!(step.class(), StepClass::Terminal, "{}", step.intent_name());
        }

        let consequential = [
            NextStep::CreateIssue {
                issue: IssueDraft {
                    title: String::new(),
                    description: String::new(),
                    team_id: String::new(),
                    assignee_id: None,
                },
            },
            NextStep::PushTag { tag: String::new(), commit_sha: None },
            NextStep::AddToMailingList {
                email: String::new(),
                first_name: None,
                last_name: None,
                mailing_list_id: String::new(),
            },
        ];
        for step in &consequential {
            assert_eq!(
                step.class(),
                StepClass::Consequential,
                "{}",
                step.intent_name()
            );
        }

        let read_only = [
            NextStep::ListTeams,
            NextStep::ListDeployments,
            NextStep::GetIssueComments { issue_id: "I-1".to_string() },
        ];
        for step in &read_only {
            assert_eq!(step.class(), StepClass::ReadOnly, "{}", step.intent_name());
        }
    }
}

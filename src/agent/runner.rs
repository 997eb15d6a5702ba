//! The agent control loop and its resumption entry point.
//!
//! One pass serializes the thread, asks the planner for a step, and
//! dispatches on the step's class. Read-only steps execute inline and loop
//! back to planning; terminal and consequential steps persist the thread,
//! notify the approval transport, and suspend. Resumption is a separate
//! entry point driven by the completion webhook — no closure or in-memory
//! handle survives a suspension.

use std::sync::Arc;

use crate::agent::intent::{NextStep, StepClass, result_event_kind};
use crate::approvals::{
    ApprovalCall, ApprovalTransport, ContactChannel, FunctionCall, FunctionCallSpec, HumanContact,
    HumanContactSpec, StateRef,
};
use crate::cache::ResultCache;
use crate::error::{AgentError, StoreError, ToolError};
use crate::llm::{Planner, Summarizer};
use crate::store::ThreadStore;
use crate::thread::{Event, Thread, prompt};
use crate::tools::{ToolFuture, Toolbox};

/// How a loop pass left its thread. The loop only ever exits by suspending;
/// planner or transport failures surface as errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A consequential step was submitted for approval.
    AwaitingApproval { state_id: String },
    /// A terminal-conversational step is waiting on a human reply.
    AwaitingHuman { state_id: String },
}

impl Outcome {
    pub fn state_id(&self) -> &str {
        match self {
            Outcome::AwaitingApproval { state_id } | Outcome::AwaitingHuman { state_id } => {
                state_id
            }
        }
    }
}

/// A completed human interaction, delivered by the approval transport's
/// webhook.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    Contact(HumanContact),
    FunctionCall(FunctionCall),
}

/// The control loop: planner, summarizer, tools, approval transport, cache,
/// and thread persistence wired together.
pub struct AgentRunner {
    planner: Arc<dyn Planner>,
    summarizer: Arc<dyn Summarizer>,
    approvals: Arc<dyn ApprovalTransport>,
    toolbox: Toolbox,
    cache: ResultCache,
    threads: ThreadStore,
    /// Workflow file dispatched when a deployment promotion is approved.
    promote_workflow: String,
}

impl AgentRunner {
    pub fn new(
        planner: Arc<dyn Planner>,
        summarizer: Arc<dyn Summarizer>,
        approvals: Arc<dyn ApprovalTransport>,
        toolbox: Toolbox,
        cache: ResultCache,
        threads: ThreadStore,
        promote_workflow: String,
    ) -> Self {
        Self {
            planner,
            summarizer,
            approvals,
            toolbox,
            cache,
            threads,
            promote_workflow,
        }
    }

    /// Drive the thread until it suspends for human input.
    pub async fn run(&self, mut thread: Thread) -> Result<Outcome, AgentError> {
        loop {
            let prompt_text = prompt::render(&thread);
            let step = self.planner.determine_next_step(&prompt_text).await?;
            tracing::info!(
                thread_id = %thread.id,
                intent = %step.intent_name(),
                "planner returned next step"
            );

            thread.append(Event::step(step.clone()));

            match step.class() {
                StepClass::Terminal => {
                    let message = step.terminal_message().unwrap_or_default().to_string();
                    return self.suspend_for_contact(thread, message).await;
                }
                StepClass::Consequential => match approval_call(&step) {
                    Some(call) => return self.suspend_for_approval(thread, call).await,
                    None => {
                        // Classification and the call mapping disagree; a
                        // bookkeeping fault, not a planner mistake.
                        thread.append(Event::text(
                            "error",
                            format!(
                                "No approval mapping for {} - something is wrong with your \
                                 internal programming, please get help from a human",
                                step.intent_name()
                            ),
                        ));
                    }
                },
                StepClass::ReadOnly => {
                    self.execute_read_only(&mut thread, &step).await;
                }
                StepClass::Unrecognized => {
                    thread.append(Event::text(
                        "error",
                        format!(
                            "you called a tool that is not implemented: {}, something is \
                             wrong with your internal programming, please get help from a human",
                            step.intent_name()
                        ),
                    ));
                }
            }
        }
    }

    /// Resume a suspended thread from a completion webhook.
    pub async fn on_human_response(
        &self,
        completion: CompletionEvent,
    ) -> Result<Outcome, AgentError> {
        match completion {
            CompletionEvent::Contact(contact) => {
                let mut thread = self.resolve_state(contact.spec.state).await?;
                let reply = contact
                    .status
                    .and_then(|status| status.response)
                    .unwrap_or_else(|| "(no response provided)".to_string());
                tracing::info!(thread_id = %thread.id, "human reply received");
                thread.append(Event::text("human_response", reply));
                self.run(thread).await
            }
            CompletionEvent::FunctionCall(call) => {
                let mut thread = self.resolve_state(call.spec.state.clone()).await?;
                let status = call.status.unwrap_or_default();

                if status.approved != Some(true) {
                    // A denial is ordinary conversational input, not an error.
                    let comment = status
                        .comment
                        .unwrap_or_else(|| "(no comment provided)".to_string());
                    tracing::info!(
                        thread_id = %thread.id,
                        function = %call.spec.name,
                        "human denied function call"
                    );
                    thread.append(Event::text(
                        "human_response",
                        format!("User denied {} with feedback: {comment}", call.spec.name),
                    ));
                    return self.run(thread).await;
                }

                match call.spec.to_call() {
                    Some(approved) => {
                        tracing::info!(
                            thread_id = %thread.id,
                            function = %call.spec.name,
                            "human approved function call, executing"
                        );
                        self.execute_approved(&mut thread, approved).await;
                    }
                    None => {
                        thread.append(Event::text(
                            "error",
                            format!("Unknown function call: {}", call.spec.name),
                        ));
                    }
                }
                self.run(thread).await
            }
        }
    }

    /// Execute read-only prefill intents so the planner starts with warm
    /// context. Runs sequentially to keep event order deterministic.
    pub async fn prefill_context(&self, thread: &mut Thread, steps: &[NextStep]) {
        for step in steps {
            if step.class() != StepClass::ReadOnly {
                continue;
            }
            tracing::debug!(thread_id = %thread.id, intent = %step.intent_name(), "prefilling context");
            thread.append(Event::step(step.clone()));
            self.execute_read_only(thread, step).await;
        }
    }

    /// The read-only intents worth prefilling for a fresh thread.
    pub fn default_prefill(&self) -> Vec<NextStep> {
        let mut steps = vec![
            NextStep::ListProjects,
            NextStep::ListTeams,
            NextStep::ListUsers,
            NextStep::ListLabels { name_contains: None },
            NextStep::ListWorkflowStates { team_id: None },
        ];
        if self.toolbox.mailing.is_some() {
            steps.push(NextStep::ListMailingLists);
        }
        steps
    }

    async fn suspend_for_contact(
        &self,
        thread: Thread,
        message: String,
    ) -> Result<Outcome, AgentError> {
        let state_id = self.threads.checkpoint(&thread).await?;
        let channel = ContactChannel::for_origin(&thread.origin);
        self.approvals
            .create_human_contact(
                &channel,
                HumanContactSpec {
                    msg: message,
                    state: Some(StateRef::Id(state_id.clone())),
                },
            )
            .await?;
        tracing::info!(thread_id = %thread.id, state_id = %state_id, "suspended awaiting human reply");
        Ok(Outcome::AwaitingHuman { state_id })
    }

    async fn suspend_for_approval(
        &self,
        thread: Thread,
        call: ApprovalCall,
    ) -> Result<Outcome, AgentError> {
        let state_id = self.threads.checkpoint(&thread).await?;
        let channel = ContactChannel::for_origin(&thread.origin);
        self.approvals
            .create_function_call(
                &channel,
                FunctionCallSpec::new(&call, StateRef::Id(state_id.clone())),
            )
            .await?;
        tracing::info!(
            thread_id = %thread.id,
            state_id = %state_id,
            function = call.name(),
            "suspended awaiting approval"
        );
        Ok(Outcome::AwaitingApproval { state_id })
    }

    async fn resolve_state(&self, state: Option<StateRef>) -> Result<Thread, StoreError> {
        match state {
            Some(StateRef::Inline(thread)) => Ok(*thread),
            Some(StateRef::Id(state_id)) => self.threads.load(&state_id).await,
            None => Err(StoreError::MissingState),
        }
    }

    async fn execute_read_only(&self, thread: &mut Thread, step: &NextStep) {
        let tracker = self.toolbox.tracker.as_ref();
        let (cache_key, compute): (Option<String>, ToolFuture<'_>) = match step {
            NextStep::ListTeams => (Some("teams".to_string()), tracker.list_teams()),
            NextStep::ListUsers => (Some("users".to_string()), tracker.list_users()),
            NextStep::ListProjects => (Some("projects".to_string()), tracker.list_projects()),
            NextStep::ListLabels { name_contains } => (
                Some(format!(
                    "labels::{}",
                    name_contains.as_deref().unwrap_or_default()
                )),
                tracker.list_labels(name_contains.as_deref()),
            ),
            NextStep::SearchIssues { query } => (
                Some(format!("search::{query}")),
                tracker.search_issues(query),
            ),
            NextStep::GetIssueComments { issue_id } => (
                Some(format!("comments::{issue_id}")),
                tracker.get_issue_comments(issue_id),
            ),
            NextStep::ListWorkflowStates { team_id } => (
                Some(format!(
                    "workflow_states::{}",
                    team_id.as_deref().unwrap_or_default()
                )),
                tracker.list_workflow_states(team_id.as_deref()),
            ),
            // Deployment and git state move too fast to cache.
            NextStep::ListDeployments => (None, self.toolbox.deploys.list_deployments()),
            NextStep::ListCommits { limit } => {
                (None, self.toolbox.forge.list_commits(limit.unwrap_or(10)))
            }
            NextStep::ListTags => (None, self.toolbox.forge.list_tags()),
            NextStep::ListMailingLists => match self.toolbox.mailing() {
                Ok(mailing) => (
                    Some("mailing_lists".to_string()),
                    mailing.list_mailing_lists(),
                ),
                Err(e) => (None, not_configured(e)),
            },
            other => {
                thread.append(Event::text(
                    "error",
                    format!(
                        "{} is not an auto-executable operation - something is wrong with \
                         your internal programming, please get help from a human",
                        other.intent_name()
                    ),
                ));
                return;
            }
        };

        self.append_result(thread, cache_key.as_deref(), compute)
            .await;
    }

    async fn execute_approved(&self, thread: &mut Thread, call: ApprovalCall) {
        match call {
            ApprovalCall::CreateIssue { issue } => {
                let compute = self.toolbox.tracker.create_issue(&issue);
                self.append_result(thread, None, compute).await;
            }
            ApprovalCall::UpdateIssue { issue_id, update } => {
                let compute = self.toolbox.tracker.update_issue(&issue_id, &update);
                self.append_result(thread, None, compute).await;
            }
            ApprovalCall::AddComment {
                issue_id, comment, ..
            } => {
                let compute = self.toolbox.tracker.add_comment(&issue_id, &comment);
                self.append_result(thread, None, compute).await;
            }
            ApprovalCall::PromoteDeployment {
                deployment_id,
                commit_sha,
                ..
            } => {
                let inputs = serde_json::json!({
                    "deployment_id": deployment_id,
                    "commit_sha": commit_sha,
                });
                let compute = self.toolbox.forge.trigger_workflow_dispatch(
                    &self.promote_workflow,
                    "main",
                    inputs,
                );
                self.append_result(thread, None, compute).await;
            }
            ApprovalCall::PushTag { tag, commit_sha } => {
                let compute = self.toolbox.forge.push_tag(&tag, commit_sha.as_deref());
                self.append_result(thread, None, compute).await;
            }
            ApprovalCall::AddToMailingList {
                email,
                first_name,
                last_name,
                mailing_list_id,
            } => match self.toolbox.mailing() {
                Ok(mailing) => {
                    let compute = mailing.add_contact(
                        &email,
                        first_name.as_deref(),
                        last_name.as_deref(),
                        &mailing_list_id,
                    );
                    self.append_result(thread, None, compute).await;
                }
                Err(e) => {
                    self.append_result(thread, None, not_configured(e)).await;
                }
            },
        }
    }

    /// Resolve a tool operation and append its result to the thread.
    ///
    /// The result-event kind comes from the last appended event (the intent
    /// announcement). A last event with no mapping means the loop's own
    /// bookkeeping is inconsistent: a diagnostic error event is appended and
    /// the operation is never started.
    async fn append_result(
        &self,
        thread: &mut Thread,
        cache_key: Option<&str>,
        compute: ToolFuture<'_>,
    ) {
        let last_kind = thread
            .last_event()
            .map(|event| event.kind.clone())
            .unwrap_or_default();
        let Some(result_kind) = result_event_kind(&last_kind) else {
            tracing::error!(thread_id = %thread.id, last_kind = %last_kind, "no result type mapped");
            thread.append(Event::text(
                "error",
                format!(
                    "No response type found for {last_kind} - something is wrong with your \
                     internal programming, please get help from a human"
                ),
            ));
            return;
        };

        let prompt_text = prompt::render(thread);
        match self
            .cache
            .fetch(cache_key, &prompt_text, self.summarizer.as_ref(), compute)
            .await
        {
            Ok(summary) => thread.append(Event::text(result_kind, summary)),
            Err(e) => {
                tracing::warn!(thread_id = %thread.id, error = %e, "tool execution failed");
                let diagnostic = format!("error running {last_kind}: {e}");
                let squashed = self
                    .summarizer
                    .squash(&prompt_text, &diagnostic)
                    .await
                    .unwrap_or(diagnostic);
                thread.append(Event::text("error", squashed));
            }
        }
    }
}

/// The typed approval submission for a consequential step.
fn approval_call(step: &NextStep) -> Option<ApprovalCall> {
    match step {
        NextStep::CreateIssue { issue } => Some(ApprovalCall::CreateIssue {
            issue: issue.clone(),
        }),
        NextStep::UpdateIssue { issue_id, update } => Some(ApprovalCall::UpdateIssue {
            issue_id: issue_id.clone(),
            update: update.clone(),
        }),
        NextStep::AddComment {
            issue_id,
            comment,
            view_issue_url,
        } => Some(ApprovalCall::AddComment {
            issue_id: issue_id.clone(),
            comment: comment.clone(),
            view_issue_url: view_issue_url.clone(),
        }),
        NextStep::PromoteDeployment {
            deployment,
            previous_deployment,
        } => Some(ApprovalCall::PromoteDeployment {
            deployment_id: deployment.id.clone(),
            commit_sha: deployment.commit_sha.clone(),
            new_deployment: deployment.markdown.clone(),
            previous_deployment: previous_deployment.markdown.clone(),
        }),
        NextStep::PushTag { tag, commit_sha } => Some(ApprovalCall::PushTag {
            tag: tag.clone(),
            commit_sha: commit_sha.clone(),
        }),
        NextStep::AddToMailingList {
            email,
            first_name,
            last_name,
            mailing_list_id,
        } => Some(ApprovalCall::AddToMailingList {
            email: email.clone(),
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            mailing_list_id: mailing_list_id.clone(),
        }),
        _ => None,
    }
}

fn not_configured(e: ToolError) -> ToolFuture<'static> {
    Box::pin(async move { Err(e) })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::agent::intent::{DeploymentRef, IssueDraft, IssuePatch};
    use crate::approvals::{FunctionCallStatus, HumanContactStatus};
    use crate::cache::CacheStats;
    use crate::error::PlannerError;
    use crate::store::MemoryKv;
    use crate::thread::EmailPayload;

    struct ScriptedPlanner {
        script: Mutex<VecDeque<NextStep>>,
        calls: AtomicUsize,
    }

    impl ScriptedPlanner {
        fn new(steps: Vec<NextStep>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn push(&self, step: NextStep) {
            self.script.lock().unwrap().push_back(step);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn determine_next_step(&self, _prompt: &str) -> Result<NextStep, PlannerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(PlannerError::InvalidResponse {
                    reason: "planner called past the end of the script".to_string(),
                })
        }
    }

    struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn squash(&self, _prompt: &str, new_content: &str) -> Result<String, PlannerError> {
            Ok(new_content.to_string())
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        contacts: Mutex<Vec<HumanContactSpec>>,
        function_calls: Mutex<Vec<FunctionCallSpec>>,
    }

    #[async_trait]
    impl ApprovalTransport for RecordingTransport {
        async fn create_function_call(
            &self,
            _channel: &ContactChannel,
            spec: FunctionCallSpec,
        ) -> Result<(), crate::error::ApprovalError> {
            self.function_calls.lock().unwrap().push(spec);
            Ok(())
        }

        async fn create_human_contact(
            &self,
            _channel: &ContactChannel,
            spec: HumanContactSpec,
        ) -> Result<(), crate::error::ApprovalError> {
            self.contacts.lock().unwrap().push(spec);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTracker {
        created: Mutex<Vec<IssueDraft>>,
        fail_lists: bool,
    }

    #[async_trait]
    impl crate::tools::TrackerClient for FakeTracker {
        async fn list_teams(&self) -> Result<Value, ToolError> {
            if self.fail_lists {
                return Err(ToolError::RequestFailed {
                    provider: "tracker",
                    reason: "connection refused".to_string(),
                });
            }
            Ok(json!({"teams": [{"id": "TEAM-1", "name": "Platform"}]}))
        }

        async fn list_users(&self) -> Result<Value, ToolError> {
            Ok(json!({"users": []}))
        }

        async fn list_projects(&self) -> Result<Value, ToolError> {
            Ok(json!({"projects": []}))
        }

        async fn list_labels(&self, _name_contains: Option<&str>) -> Result<Value, ToolError> {
            Ok(json!({"labels": []}))
        }

        async fn search_issues(&self, query: &str) -> Result<Value, ToolError> {
            Ok(json!({"query": query, "issues": []}))
        }

        async fn get_issue_comments(&self, _issue_id: &str) -> Result<Value, ToolError> {
            Ok(json!({"comments": []}))
        }

        async fn list_workflow_states(&self, _team_id: Option<&str>) -> Result<Value, ToolError> {
            Ok(json!({"states": []}))
        }

        async fn create_issue(&self, draft: &IssueDraft) -> Result<Value, ToolError> {
            self.created.lock().unwrap().push(draft.clone());
            Ok(json!({"id": "ISS-1", "title": draft.title}))
        }

        async fn update_issue(
            &self,
            issue_id: &str,
            _patch: &IssuePatch,
        ) -> Result<Value, ToolError> {
            Ok(json!({"id": issue_id, "updated": true}))
        }

        async fn add_comment(&self, issue_id: &str, _body: &str) -> Result<Value, ToolError> {
            Ok(json!({"issue_id": issue_id, "commented": true}))
        }
    }

    #[derive(Default)]
    struct FakeDeploys {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::tools::DeployClient for FakeDeploys {
        async fn list_deployments(&self) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "current_deployment": {"id": "dpl_122", "commit_sha": "aaa1111"},
                "recent_deployments": [
                    {"id": "dpl_123", "commit_sha": "bbb2222"},
                    {"id": "dpl_122", "commit_sha": "aaa1111"},
                ],
            }))
        }
    }

    #[derive(Default)]
    struct FakeForge {
        dispatches: Mutex<Vec<(String, String, Value)>>,
    }

    #[async_trait]
    impl crate::tools::ForgeClient for FakeForge {
        async fn list_commits(&self, _limit: u32) -> Result<Value, ToolError> {
            Ok(json!([{"sha": "bbb2222", "message": "fix sensor"}]))
        }

        async fn list_tags(&self) -> Result<Value, ToolError> {
            Ok(json!([{"name": "v1.0.0"}]))
        }

        async fn push_tag(&self, tag: &str, _commit_sha: Option<&str>) -> Result<Value, ToolError> {
            Ok(json!({"tag": tag, "status": "created"}))
        }

        async fn trigger_workflow_dispatch(
            &self,
            workflow: &str,
            git_ref: &str,
            inputs: Value,
        ) -> Result<Value, ToolError> {
            self.dispatches.lock().unwrap().push((
                workflow.to_string(),
                git_ref.to_string(),
                inputs,
            ));
            Ok(json!({"status": "dispatched"}))
        }
    }

    struct Harness {
        runner: AgentRunner,
        planner: Arc<ScriptedPlanner>,
        transport: Arc<RecordingTransport>,
        tracker: Arc<FakeTracker>,
        deploys: Arc<FakeDeploys>,
        forge: Arc<FakeForge>,
        threads: ThreadStore,
    }

    fn harness_with(planner_script: Vec<NextStep>, tracker: FakeTracker) -> Harness {
        let planner = Arc::new(ScriptedPlanner::new(planner_script));
        let transport = Arc::new(RecordingTransport::default());
        let tracker = Arc::new(tracker);
        let deploys = Arc::new(FakeDeploys::default());
        let forge = Arc::new(FakeForge::default());

        let kv = Arc::new(MemoryKv::new());
        let threads = ThreadStore::new(kv.clone(), None);
        let cache = ResultCache::new(
            kv,
            Duration::from_secs(3600),
            Arc::new(CacheStats::new()),
        );

        let runner = AgentRunner::new(
            planner.clone(),
            Arc::new(EchoSummarizer),
            transport.clone(),
            Toolbox {
                tracker: tracker.clone(),
                deploys: deploys.clone(),
                forge: forge.clone(),
                mailing: None,
            },
            cache,
            threads.clone(),
            "promote-to-prod.yaml".to_string(),
        );

        Harness {
            runner,
            planner,
            transport,
            tracker,
            deploys,
            forge,
            threads,
        }
    }

    fn harness(planner_script: Vec<NextStep>) -> Harness {
        harness_with(planner_script, FakeTracker::default())
    }

    fn email_thread() -> Thread {
        Thread::from_email(EmailPayload {
            from_address: "ceo@example.com".to_string(),
            to_address: "bot@example.com".to_string(),
            subject: "Deploy please".to_string(),
            body: "Ship the latest build.".to_string(),
            message_id: "<msg-1@example.com>".to_string(),
            previous_thread: Vec::new(),
        })
    }

    fn promote_step() -> NextStep {
        NextStep::PromoteDeployment {
            deployment: DeploymentRef {
                id: "dpl_123".to_string(),
                commit_sha: "bbb2222".to_string(),
                markdown: "dpl_123 (bbb2222)".to_string(),
            },
            previous_deployment: DeploymentRef {
                id: "dpl_122".to_string(),
                commit_sha: "aaa1111".to_string(),
                markdown: "dpl_122 (aaa1111)".to_string(),
            },
        }
    }

    fn create_issue_step() -> NextStep {
        NextStep::CreateIssue {
            issue: IssueDraft {
                title: "Stock the fridges".to_string(),
                description: "Sparkling water is out.".to_string(),
                team_id: "TEAM-1".to_string(),
                assignee_id: None,
            },
        }
    }

    fn event_kinds(thread: &Thread) -> Vec<&str> {
        thread.events().iter().map(|e| e.kind.as_str()).collect()
    }

    #[tokio::test]
    async fn deploy_request_auto_executes_then_suspends_for_approval() {
        let h = harness(vec![NextStep::ListDeployments, promote_step()]);

        let outcome = h.runner.run(email_thread()).await.expect("run");
        let Outcome::AwaitingApproval { state_id } = outcome else {
            panic!("expected approval suspension, got {outcome:?}");
        };

        let suspended = h.threads.load(&state_id).await.expect("load snapshot");
        assert_eq!(
            event_kinds(&suspended),
            vec![
                "email_received",
                "list_deployments",
                "list_deployments_result",
                "promote_deployment",
            ]
        );

        // The submitted spec carries the typed params and the state id.
        let calls = h.transport.function_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "promote_deployment");
        assert_eq!(calls[0].kwargs["deployment_id"], "dpl_123");
        assert_eq!(calls[0].state, Some(StateRef::Id(state_id)));

        // Two planning passes, and none after suspension.
        assert_eq!(h.planner.calls(), 2);
        assert_eq!(h.deploys.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_becomes_a_human_response_without_executing_the_tool() {
        let h = harness(vec![create_issue_step()]);
        let outcome = h.runner.run(email_thread()).await.expect("run");
        let spec = h.transport.function_calls.lock().unwrap()[0].clone();
        assert!(matches!(outcome, Outcome::AwaitingApproval { .. }));

        h.planner.push(NextStep::DoneForNow {
            message: "Understood, skipping the ticket.".to_string(),
        });
        let resumed = h
            .runner
            .on_human_response(CompletionEvent::FunctionCall(FunctionCall {
                spec,
                status: Some(FunctionCallStatus {
                    approved: Some(false),
                    comment: Some("not needed".to_string()),
                }),
            }))
            .await
            .expect("resume");

        let Outcome::AwaitingHuman { state_id } = resumed else {
            panic!("expected human-contact suspension, got {resumed:?}");
        };
        let thread = h.threads.load(&state_id).await.expect("load");

        let denials: Vec<_> = thread
            .events()
            .iter()
            .filter(|e| e.kind == "human_response")
            .collect();
        assert_eq!(denials.len(), 1);
        assert_eq!(
            denials[0].data,
            crate::thread::EventData::Text(
                "User denied create_issue with feedback: not needed".to_string()
            )
        );

        // The tracker mutation never ran.
        assert!(h.tracker.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_executes_the_original_params_exactly_once() {
        let h = harness(vec![create_issue_step()]);
        h.runner.run(email_thread()).await.expect("run");
        let spec = h.transport.function_calls.lock().unwrap()[0].clone();

        h.planner.push(NextStep::DoneForNow {
            message: "Issue filed.".to_string(),
        });
        let resumed = h
            .runner
            .on_human_response(CompletionEvent::FunctionCall(FunctionCall {
                spec,
                status: Some(FunctionCallStatus {
                    approved: Some(true),
                    comment: None,
                }),
            }))
            .await
            .expect("resume");

        let created = h.tracker.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Stock the fridges");
        assert_eq!(created[0].team_id, "TEAM-1");
        drop(created);

        let thread = h.threads.load(resumed.state_id()).await.expect("load");
        assert!(
            event_kinds(&thread).contains(&"create_issue_result"),
            "expected a create_issue_result event, got {:?}",
            event_kinds(&thread)
        );
    }

    #[tokio::test]
    async fn approved_promotion_dispatches_the_promote_workflow() {
        let h = harness(vec![promote_step()]);
        h.runner.run(email_thread()).await.expect("run");
        let spec = h.transport.function_calls.lock().unwrap()[0].clone();

        h.planner.push(NextStep::DoneForNow {
            message: "Promoted.".to_string(),
        });
        h.runner
            .on_human_response(CompletionEvent::FunctionCall(FunctionCall {
                spec,
                status: Some(FunctionCallStatus {
                    approved: Some(true),
                    comment: None,
                }),
            }))
            .await
            .expect("resume");

        let dispatches = h.forge.dispatches.lock().unwrap();
        assert_eq!(dispatches.len(), 1);
        let (workflow, git_ref, inputs) = &dispatches[0];
        assert_eq!(workflow, "promote-to-prod.yaml");
        assert_eq!(git_ref, "main");
        assert_eq!(inputs["deployment_id"], "dpl_123");
    }

    #[tokio::test]
    async fn unrecognized_intent_appends_one_error_and_keeps_looping() {
        let h = harness(vec![
            NextStep::Unrecognized {
                name: "frobnicate".to_string(),
            },
            NextStep::DoneForNow {
                message: "Nothing I can do here.".to_string(),
            },
        ]);

        let outcome = h.runner.run(email_thread()).await.expect("run");
        let thread = h.threads.load(outcome.state_id()).await.expect("load");

        let errors: Vec<_> = thread
            .events()
            .iter()
            .filter(|e| e.kind == "error")
            .collect();
        assert_eq!(errors.len(), 1);
        match &errors[0].data {
            crate::thread::EventData::Text(text) => assert!(text.contains("frobnicate")),
            other => panic!("expected text payload, got {other:?}"),
        }
        assert_eq!(h.planner.calls(), 2);
    }

    #[tokio::test]
    async fn tool_failure_becomes_an_error_event_and_planning_continues() {
        let h = harness_with(
            vec![
                NextStep::ListTeams,
                NextStep::DoneForNow {
                    message: "The tracker is down, try again later.".to_string(),
                },
            ],
            FakeTracker {
                fail_lists: true,
                ..FakeTracker::default()
            },
        );

        let outcome = h.runner.run(email_thread()).await.expect("run");
        let thread = h.threads.load(outcome.state_id()).await.expect("load");

        let error = thread
            .events()
            .iter()
            .find(|e| e.kind == "error")
            .expect("error event");
        match &error.data {
            crate::thread::EventData::Text(text) => {
                assert!(text.contains("error running list_teams"));
            }
            other => panic!("expected text payload, got {other:?}"),
        }
        assert_eq!(h.planner.calls(), 2);
    }

    #[tokio::test]
    async fn unknown_function_name_on_completion_is_surfaced_to_the_planner() {
        let h = harness(vec![NextStep::DoneForNow {
            message: "ok".to_string(),
        }]);

        let thread = email_thread();
        let resumed = h
            .runner
            .on_human_response(CompletionEvent::FunctionCall(FunctionCall {
                spec: FunctionCallSpec {
                    name: "frobnicate".to_string(),
                    kwargs: json!({}),
                    state: Some(StateRef::Inline(Box::new(thread))),
                },
                status: Some(FunctionCallStatus {
                    approved: Some(true),
                    comment: None,
                }),
            }))
            .await
            .expect("resume");

        let stored = h.threads.load(resumed.state_id()).await.expect("load");
        let error = stored
            .events()
            .iter()
            .find(|e| e.kind == "error")
            .expect("error event");
        match &error.data {
            crate::thread::EventData::Text(text) => {
                assert!(text.contains("Unknown function call: frobnicate"));
            }
            other => panic!("expected text payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn approval_against_a_tampered_snapshot_hits_the_mapping_guard() {
        // The snapshot's last event should be the consequential intent; an
        // email_received tail means the bookkeeping broke. The guard refuses
        // to execute and appends a diagnostic instead.
        let h = harness(vec![NextStep::DoneForNow {
            message: "ok".to_string(),
        }]);

        let call = ApprovalCall::CreateIssue {
            issue: IssueDraft {
                title: "t".to_string(),
                description: "d".to_string(),
                team_id: "TEAM-1".to_string(),
                assignee_id: None,
            },
        };
        let resumed = h
            .runner
            .on_human_response(CompletionEvent::FunctionCall(FunctionCall {
                spec: FunctionCallSpec::new(&call, StateRef::Inline(Box::new(email_thread()))),
                status: Some(FunctionCallStatus {
                    approved: Some(true),
                    comment: None,
                }),
            }))
            .await
            .expect("resume");

        let stored = h.threads.load(resumed.state_id()).await.expect("load");
        let error = stored
            .events()
            .iter()
            .find(|e| e.kind == "error")
            .expect("error event");
        match &error.data {
            crate::thread::EventData::Text(text) => {
                assert!(text.contains("No response type found for email_received"));
            }
            other => panic!("expected text payload, got {other:?}"),
        }
        assert!(h.tracker.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn human_reply_resumes_planning_from_the_stored_snapshot() {
        let h = harness(vec![NextStep::RequestMoreInformation {
            message: "Which environment?".to_string(),
        }]);
        let outcome = h.runner.run(email_thread()).await.expect("run");

        let contact = h.transport.contacts.lock().unwrap()[0].clone();
        assert_eq!(contact.msg, "Which environment?");
        assert_eq!(
            contact.state,
            Some(StateRef::Id(outcome.state_id().to_string()))
        );

        h.planner.push(NextStep::DoneForNow {
            message: "Deploying to production.".to_string(),
        });
        let resumed = h
            .runner
            .on_human_response(CompletionEvent::Contact(HumanContact {
                spec: contact,
                status: Some(HumanContactStatus {
                    response: Some("production".to_string()),
                }),
            }))
            .await
            .expect("resume");

        let thread = h.threads.load(resumed.state_id()).await.expect("load");
        let kinds = event_kinds(&thread);
        assert_eq!(
            kinds,
            vec![
                "email_received",
                "request_more_information",
                "human_response",
                "done_for_now",
            ]
        );
    }

    #[tokio::test]
    async fn resumption_without_state_is_rejected() {
        let h = harness(vec![]);
        let err = h
            .runner
            .on_human_response(CompletionEvent::Contact(HumanContact {
                spec: HumanContactSpec {
                    msg: "hi".to_string(),
                    state: None,
                },
                status: Some(HumanContactStatus {
                    response: Some("hello".to_string()),
                }),
            }))
            .await
            .expect_err("missing state");
        assert!(matches!(err, AgentError::Store(StoreError::MissingState)));
    }

    #[tokio::test]
    async fn planner_failure_aborts_the_pass() {
        // An empty script makes the planner fail on the first call.
        let h = harness(vec![]);
        let err = h.runner.run(email_thread()).await.expect_err("planner");
        assert!(matches!(err, AgentError::Planner(_)));
    }

    #[tokio::test]
    async fn prefill_runs_read_only_steps_in_order() {
        let h = harness(vec![]);
        let mut thread = email_thread();
        h.runner
            .prefill_context(
                &mut thread,
                &[NextStep::ListProjects, NextStep::ListTeams],
            )
            .await;

        assert_eq!(
            event_kinds(&thread),
            vec![
                "email_received",
                "list_projects",
                "list_projects_result",
                "list_teams",
                "list_teams_result",
            ]
        );
        // Prefill never invokes the planner.
        assert_eq!(h.planner.calls(), 0);
    }
}

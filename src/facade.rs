/// Workflow facade
///
/// The single entry point for every verb. Each call checks the actor's
/// permission first and only then touches anything, so a `Forbidden` call has
/// no side effects at all (not even a presence update). Errors from the
/// components pass through unchanged, wrapped in a [`Failure`] that carries
/// the workflow's current state when the actor may see it.

use crate::access::{AccessPolicy, Actor, IdentityDirectory, Permission, RolePolicy, StaticDirectory, UserId};
use crate::advisory::{Advice, AdviceKind, Advisor, AdvisoryRequest, DisabledAdvisor};
use crate::collab::{ActivityFeed, ActivityPage, PresenceEntry, PresenceTracker};
use crate::error::{EngineError, EngineResult, Failure};
use crate::storage::{CommitOutcome, WorkflowStore};
use crate::workflow::{
    ActivityEvent, AnswerCoverage, AxisComment, AxisId, CommentId, CommentThreadStore, CompletenessGate, Cursor,
    Operation, Recommendation, ResolveOutcome, Review, ReviewLedger, Snapshot, Version, WorkflowId,
    WorkflowStateMachine, WorkflowSummary,
};
use futures::Stream;
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};

pub type FacadeResult<T> = Result<T, Failure>;

/// Outcome of `submit_review`
#[derive(Debug, Clone, Serialize)]
pub struct ReviewReceipt {
    pub summary: WorkflowSummary,
    pub review: Option<Review>,
    /// This was the last outstanding review of the round
    pub was_last: bool,
}

pub struct WorkflowFacade {
    store: Arc<dyn WorkflowStore>,
    policy: Arc<dyn AccessPolicy>,
    machine: WorkflowStateMachine,
    comments: CommentThreadStore,
    presence: Arc<PresenceTracker>,
    activity: ActivityFeed,
    advisor: Arc<dyn Advisor>,
    advisory_timeout: Duration,
}

/// Wiring for a `WorkflowFacade`; every collaborator has a working default
pub struct FacadeBuilder {
    store: Arc<dyn WorkflowStore>,
    policy: Arc<dyn AccessPolicy>,
    directory: Arc<dyn IdentityDirectory>,
    gate: CompletenessGate,
    liveness: Duration,
    page_size: usize,
    advisor: Arc<dyn Advisor>,
    advisory_timeout: Duration,
}

impl FacadeBuilder {
    pub fn policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn directory(mut self, directory: Arc<dyn IdentityDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn gate(mut self, gate: CompletenessGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn liveness(mut self, liveness: Duration) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn Advisor>, timeout: Duration) -> Self {
        self.advisor = advisor;
        self.advisory_timeout = timeout;
        self
    }

    pub fn build(self) -> WorkflowFacade {
        let reviews = ReviewLedger::new(Arc::clone(&self.store), self.directory);
        WorkflowFacade {
            machine: WorkflowStateMachine::new(Arc::clone(&self.store), Arc::clone(&self.policy), reviews, self.gate),
            comments: CommentThreadStore::new(Arc::clone(&self.store)),
            presence: Arc::new(PresenceTracker::new(self.liveness)),
            activity: ActivityFeed::new(Arc::clone(&self.store), self.page_size),
            store: self.store,
            policy: self.policy,
            advisor: self.advisor,
            advisory_timeout: self.advisory_timeout,
        }
    }
}

impl WorkflowFacade {
    pub fn builder(store: Arc<dyn WorkflowStore>) -> FacadeBuilder {
        FacadeBuilder {
            store,
            policy: Arc::new(RolePolicy::with_defaults()),
            directory: Arc::new(StaticDirectory::open()),
            gate: CompletenessGate::new(Arc::new(AnswerCoverage::default()), 1.0),
            liveness: Duration::from_secs(30),
            page_size: 50,
            advisor: Arc::new(DisabledAdvisor),
            advisory_timeout: Duration::from_secs(8),
        }
    }

    pub fn presence(&self) -> Arc<PresenceTracker> {
        Arc::clone(&self.presence)
    }

    pub fn activity(&self) -> &ActivityFeed {
        &self.activity
    }

    /// Permission check on its own, for callers that act outside the workflow
    /// verbs (e.g. role administration)
    pub fn authorize(&self, actor: &Actor, operation: Operation) -> FacadeResult<()> {
        self.policy.check(actor, operation).map_err(Failure::from)
    }

    // ---- lifecycle -------------------------------------------------------

    pub async fn initialize(&self, actor: &Actor, assessment_id: &str, snapshot: Snapshot) -> FacadeResult<WorkflowSummary> {
        self.open_or_initialize(actor, assessment_id, snapshot)
            .await
            .map(|(summary, _)| summary)
    }

    /// Like [`initialize`](Self::initialize), also reporting whether this call created the workflow
    pub async fn open_or_initialize(
        &self,
        actor: &Actor,
        assessment_id: &str,
        snapshot: Snapshot,
    ) -> FacadeResult<(WorkflowSummary, bool)> {
        self.guarded(actor, Operation::Initialize, None, async {
            let initialized = self.machine.initialize(actor, assessment_id, snapshot).await?;
            let created = initialized.event.is_some();
            let last = match initialized.event {
                Some(event) => {
                    self.activity.publish(&event);
                    Some(event)
                }
                None => self.store.latest_activity(initialized.workflow.id).await?,
            };
            Ok((WorkflowSummary::new(&initialized.workflow, last), created))
        })
        .await
    }

    pub async fn save_draft(
        &self,
        actor: &Actor,
        id: WorkflowId,
        snapshot: Snapshot,
        change_summary: Option<String>,
    ) -> FacadeResult<WorkflowSummary> {
        self.mutate(actor, Operation::SaveDraft, id, self.machine.save_draft(actor, id, snapshot, change_summary))
            .await
    }

    pub async fn submit_for_review(
        &self,
        actor: &Actor,
        id: WorkflowId,
        reviewer_ids: Vec<UserId>,
        snapshot: Option<Snapshot>,
    ) -> FacadeResult<WorkflowSummary> {
        self.mutate(
            actor,
            Operation::SubmitForReview,
            id,
            self.machine.submit_for_review(actor, id, reviewer_ids, snapshot),
        )
        .await
    }

    /// Add reviewers to the running round; re-requesting pending reviewers is a no-op
    pub async fn request_reviews(&self, actor: &Actor, id: WorkflowId, reviewer_ids: Vec<UserId>) -> FacadeResult<WorkflowSummary> {
        self.guarded(actor, Operation::RequestReviews, Some(id), async {
            match self.machine.request_reviews(actor, id, reviewer_ids).await? {
                Some(outcome) => Ok(self.published(outcome)),
                None => self.summary(id).await,
            }
        })
        .await
    }

    pub async fn submit_review(
        &self,
        actor: &Actor,
        id: WorkflowId,
        recommendation: Recommendation,
        comment: Option<String>,
    ) -> FacadeResult<ReviewReceipt> {
        self.guarded(actor, Operation::SubmitReview, Some(id), async {
            let outcome = self.machine.submit_review(actor, id, recommendation, comment).await?;
            let was_last = outcome.pending_reviews == 0;
            let review = outcome.review.clone();
            Ok(ReviewReceipt {
                summary: self.published(outcome),
                review,
                was_last,
            })
        })
        .await
    }

    pub async fn approve(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<WorkflowSummary> {
        self.mutate(actor, Operation::Approve, id, self.machine.approve(actor, id)).await
    }

    pub async fn reject(&self, actor: &Actor, id: WorkflowId, feedback: &str) -> FacadeResult<WorkflowSummary> {
        self.mutate(actor, Operation::Reject, id, self.machine.reject(actor, id, feedback)).await
    }

    pub async fn resume(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<WorkflowSummary> {
        self.mutate(actor, Operation::Resume, id, self.machine.resume(actor, id)).await
    }

    pub async fn amend(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<WorkflowSummary> {
        self.mutate(actor, Operation::Amend, id, self.machine.amend(actor, id)).await
    }

    pub async fn archive(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<WorkflowSummary> {
        self.mutate(actor, Operation::Archive, id, self.machine.archive(actor, id)).await
    }

    pub async fn restore_version(&self, actor: &Actor, id: WorkflowId, number: u32) -> FacadeResult<WorkflowSummary> {
        self.mutate(actor, Operation::RestoreVersion, id, self.machine.restore_version(actor, id, number))
            .await
    }

    // ---- comments --------------------------------------------------------

    pub async fn add_comment(
        &self,
        actor: &Actor,
        id: WorkflowId,
        axis_id: AxisId,
        parent_id: Option<CommentId>,
        body: &str,
    ) -> FacadeResult<AxisComment> {
        self.guarded(actor, Operation::AddComment, Some(id), async {
            self.machine.load_active(id).await?;
            let posted = self.comments.add_comment(actor, id, axis_id, parent_id, body).await?;
            self.activity.publish(&posted.event);
            Ok(posted.comment)
        })
        .await
    }

    pub async fn resolve_comment(&self, actor: &Actor, comment_id: CommentId, cascade: bool) -> FacadeResult<ResolveOutcome> {
        if let Err(e) = self.policy.check(actor, Operation::ResolveComment) {
            return Err(self.failure(actor, None, e).await);
        }

        let workflow_id = match self.comments.get_comment(comment_id).await {
            Ok(comment) => comment.workflow_id,
            Err(e) => return Err(self.failure(actor, None, e).await),
        };
        let result = async {
            self.machine.load_active(workflow_id).await?;
            let outcome = self.comments.resolve_comment(actor, comment_id, cascade).await?;
            if let Some(event) = &outcome.event {
                self.activity.publish(event);
            }
            Ok::<_, EngineError>(outcome)
        }
        .await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.failure(actor, Some(workflow_id), e).await),
        }
    }

    pub async fn list_comments(&self, actor: &Actor, id: WorkflowId, axis: Option<AxisId>) -> FacadeResult<Vec<AxisComment>> {
        self.guarded(actor, Operation::ListComments, Some(id), async {
            self.machine.load(id).await?;
            self.comments.list_comments(id, axis.as_ref()).await
        })
        .await
    }

    // ---- presence --------------------------------------------------------

    pub async fn heartbeat(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<PresenceEntry> {
        self.guarded(actor, Operation::Heartbeat, Some(id), async {
            self.machine.load(id).await?;
            Ok(self.presence.heartbeat(id, &actor.user_id))
        })
        .await
    }

    pub async fn leave(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<bool> {
        self.guarded(actor, Operation::Leave, Some(id), async { Ok(self.presence.leave(id, &actor.user_id)) })
            .await
    }

    pub async fn list_active(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<Vec<PresenceEntry>> {
        self.guarded(actor, Operation::ListActive, Some(id), async {
            self.machine.load(id).await?;
            Ok(self.presence.list_active(id))
        })
        .await
    }

    // ---- activity --------------------------------------------------------

    pub async fn list_activity(
        &self,
        actor: &Actor,
        id: WorkflowId,
        since: Cursor,
        limit: Option<usize>,
    ) -> FacadeResult<ActivityPage> {
        self.wait_activity(actor, id, since, limit, Duration::ZERO).await
    }

    /// `list_activity` that long-polls for up to `wait` when nothing is new
    pub async fn wait_activity(
        &self,
        actor: &Actor,
        id: WorkflowId,
        since: Cursor,
        limit: Option<usize>,
        wait: Duration,
    ) -> FacadeResult<ActivityPage> {
        self.guarded(actor, Operation::ListActivity, Some(id), async {
            self.machine.load(id).await?;
            self.activity.wait_for(id, since, limit, wait).await
        })
        .await
    }

    /// Lazy stream over every event after `since`
    pub async fn activity_stream(
        &self,
        actor: &Actor,
        id: WorkflowId,
        since: Cursor,
    ) -> FacadeResult<impl Stream<Item = EngineResult<ActivityEvent>> + Send + 'static> {
        self.guarded(actor, Operation::ListActivity, Some(id), async {
            self.machine.load(id).await?;
            Ok(self.activity.stream(id, since))
        })
        .await
    }

    // ---- reads -----------------------------------------------------------

    pub async fn get_workflow(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<WorkflowSummary> {
        self.guarded(actor, Operation::GetWorkflow, Some(id), self.summary(id)).await
    }

    pub async fn list_versions(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<Vec<Version>> {
        self.guarded(actor, Operation::ListVersions, Some(id), async {
            self.machine.load(id).await?;
            self.machine.versions().list_versions(id).await
        })
        .await
    }

    pub async fn get_version(&self, actor: &Actor, id: WorkflowId, number: u32) -> FacadeResult<Version> {
        self.guarded(actor, Operation::GetVersion, Some(id), async {
            self.machine.load(id).await?;
            self.machine.versions().get_version(id, number).await
        })
        .await
    }

    pub async fn list_reviews(&self, actor: &Actor, id: WorkflowId) -> FacadeResult<Vec<Review>> {
        self.guarded(actor, Operation::ListReviews, Some(id), async {
            self.machine.load(id).await?;
            self.machine.reviews().list_reviews(id).await
        })
        .await
    }

    // ---- advisory --------------------------------------------------------

    /// Ask the advisory collaborator about the latest snapshot; never mutates state
    pub async fn advise(&self, actor: &Actor, id: WorkflowId, kind: AdviceKind, axis_id: Option<AxisId>) -> FacadeResult<Advice> {
        self.guarded(actor, Operation::Advise, Some(id), async {
            let workflow = self.machine.load(id).await?;
            let request = AdvisoryRequest {
                workflow_id: id,
                kind,
                axis_id,
                snapshot: self.machine.versions().current_snapshot(&workflow).await?,
            };

            match tokio::time::timeout(self.advisory_timeout, self.advisor.advise(&request)).await {
                Ok(advice) => advice,
                Err(_) => {
                    tracing::warn!("⏱️ Advisory request for workflow {} timed out", id);
                    Err(EngineError::Advisory(format!(
                        "no answer within {}ms",
                        self.advisory_timeout.as_millis()
                    )))
                }
            }
        })
        .await
    }

    // ---- plumbing --------------------------------------------------------

    /// Permission check, then the work; failures get the current state attached
    async fn guarded<T>(
        &self,
        actor: &Actor,
        operation: Operation,
        id: Option<WorkflowId>,
        work: impl Future<Output = EngineResult<T>>,
    ) -> FacadeResult<T> {
        if let Err(e) = self.policy.check(actor, operation) {
            return Err(self.failure(actor, id, e).await);
        }
        match work.await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.failure(actor, id, e).await),
        }
    }

    async fn mutate(
        &self,
        actor: &Actor,
        operation: Operation,
        id: WorkflowId,
        work: impl Future<Output = EngineResult<CommitOutcome>>,
    ) -> FacadeResult<WorkflowSummary> {
        self.guarded(actor, operation, Some(id), async { Ok(self.published(work.await?)) })
            .await
    }

    fn published(&self, outcome: CommitOutcome) -> WorkflowSummary {
        self.activity.publish(&outcome.event);
        WorkflowSummary::new(&outcome.workflow, Some(outcome.event))
    }

    async fn summary(&self, id: WorkflowId) -> EngineResult<WorkflowSummary> {
        let workflow = self.machine.load(id).await?;
        let last = self.store.latest_activity(id).await?;
        Ok(WorkflowSummary::new(&workflow, last))
    }

    /// Wrap an error with the authoritative state, read after the failure.
    /// Only actors that may view the workflow get to see it.
    async fn failure(&self, actor: &Actor, id: Option<WorkflowId>, error: EngineError) -> Failure {
        if error.is_retryable() {
            tracing::debug!("🔄 {} should re-read and retry: {}", actor.user_id, error);
        }
        let current = match id {
            Some(id) if self.policy.holds(actor, Permission::View) => self.summary(id).await.ok(),
            _ => None,
        };
        Failure { error, current }
    }
}

/// Assessment workflow state machine
///
/// The transition table is a pure function of `(state, operation)`; the
/// `WorkflowStateMachine` reads the workflow, consults the table, checks the
/// guards and hands one atomic `WorkflowWrite` to the store. Transitions are
/// always guarded by the state the caller read, never by request identity, so a
/// retried approve or reject after a lost acknowledgement fails with
/// `InvalidTransition` instead of being applied twice.

use crate::access::{AccessPolicy, Actor, Permission, UserId};
use crate::error::{Entity, EngineError, EngineResult};
use crate::storage::{CommitOutcome, NewActivity, NewVersion, ReviewResponse, WorkflowStore, WorkflowWrite};
use crate::workflow::gate::CompletenessGate;
use crate::workflow::reviews::ReviewLedger;
use crate::workflow::types::{
    ActivityEvent, ActivityKind, AssessmentWorkflow, Operation, Recommendation, Snapshot, Version,
    WorkflowId, WorkflowState,
};
use crate::workflow::versions::VersionStore;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// How a committed write moves the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Stay,
    To(WorkflowState),
    /// Move to the target only if no review is pending once the write is applied
    WhenReviewsSettled(WorkflowState),
}

impl StateChange {
    pub fn resolve(self, current: WorkflowState, pending_reviews: usize) -> WorkflowState {
        match self {
            StateChange::Stay => current,
            StateChange::To(next) => next,
            StateChange::WhenReviewsSettled(next) if pending_reviews == 0 => next,
            StateChange::WhenReviewsSettled(_) => current,
        }
    }
}

/// The transition table
///
/// Non-lifecycle operations (comments, presence, reads, archival) never move
/// the workflow and are planned as `Stay` from any state.
pub fn plan(current: WorkflowState, operation: Operation) -> EngineResult<StateChange> {
    use Operation::*;
    use WorkflowState::*;

    if !operation.is_lifecycle() {
        return Ok(StateChange::Stay);
    }

    match (current, operation) {
        (Draft, SaveDraft) | (Draft, RestoreVersion) => Ok(StateChange::Stay),
        (Draft, SubmitForReview) => Ok(StateChange::To(InReview)),
        (InReview, RequestReviews) => Ok(StateChange::Stay),
        (InReview, SubmitReview) => Ok(StateChange::WhenReviewsSettled(AwaitingApproval)),
        (AwaitingApproval, Approve) => Ok(StateChange::To(Approved)),
        (AwaitingApproval, Reject) => Ok(StateChange::To(Rejected)),
        (Rejected, Resume) => Ok(StateChange::To(Draft)),
        (Approved, Amend) => Ok(StateChange::To(Draft)),
        (current, operation) => Err(EngineError::InvalidTransition { current, operation }),
    }
}

/// Result of `initialize`
#[derive(Debug, Clone)]
pub struct Initialized {
    pub workflow: AssessmentWorkflow,
    /// None when the assessment already had a workflow and nothing was written
    pub event: Option<ActivityEvent>,
}

pub struct WorkflowStateMachine {
    store: Arc<dyn WorkflowStore>,
    policy: Arc<dyn AccessPolicy>,
    gate: CompletenessGate,
    versions: VersionStore,
    reviews: ReviewLedger,
}

impl WorkflowStateMachine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        policy: Arc<dyn AccessPolicy>,
        reviews: ReviewLedger,
        gate: CompletenessGate,
    ) -> Self {
        Self {
            versions: VersionStore::new(Arc::clone(&store)),
            store,
            policy,
            gate,
            reviews,
        }
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn reviews(&self) -> &ReviewLedger {
        &self.reviews
    }

    /// Read a workflow or fail with `NotFound`
    pub async fn load(&self, id: WorkflowId) -> EngineResult<AssessmentWorkflow> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Workflow, id))
    }

    /// Read a workflow that may still be mutated
    pub async fn load_active(&self, id: WorkflowId) -> EngineResult<AssessmentWorkflow> {
        let workflow = self.load(id).await?;
        if workflow.is_archived() {
            return Err(EngineError::validation(format!("workflow {} is archived", id)));
        }
        Ok(workflow)
    }

    /// Create the workflow for an assessment with its first version
    ///
    /// Idempotent per assessment: a second call returns the existing workflow.
    pub async fn initialize(
        &self,
        actor: &Actor,
        assessment_id: &str,
        snapshot: Snapshot,
    ) -> EngineResult<Initialized> {
        if assessment_id.trim().is_empty() {
            return Err(EngineError::validation("assessment id must not be empty"));
        }

        if let Some(existing) = self.store.find_by_assessment(assessment_id).await? {
            tracing::debug!("♻️ Assessment {} already has workflow {}", assessment_id, existing.id);
            return Ok(Initialized { workflow: existing, event: None });
        }

        let now = Utc::now();
        let workflow = AssessmentWorkflow {
            id: WorkflowId::new(),
            assessment_id: assessment_id.to_string(),
            author_id: actor.user_id.clone(),
            state: WorkflowState::Draft,
            current_version: 1,
            created_at: now,
            updated_at: now,
            archived_at: None,
        };
        let first_version = Version {
            workflow_id: workflow.id,
            version_number: 1,
            snapshot,
            author_id: actor.user_id.clone(),
            change_summary: Some("initial draft".to_string()),
            created_at: now,
        };
        let activity = NewActivity::new(
            ActivityKind::Initialized,
            &actor.user_id,
            json!({ "assessment_id": assessment_id }),
        );

        match self.store.create_workflow(&workflow, &first_version, activity).await? {
            Some(event) => {
                tracing::info!("🆕 Initialized workflow {} for assessment {}", workflow.id, assessment_id);
                Ok(Initialized { workflow, event: Some(event) })
            }
            None => {
                // Lost the race to another initializer; theirs is the workflow
                let existing = self
                    .store
                    .find_by_assessment(assessment_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(Entity::Workflow, assessment_id))?;
                Ok(Initialized { workflow: existing, event: None })
            }
        }
    }

    pub async fn save_draft(
        &self,
        actor: &Actor,
        id: WorkflowId,
        snapshot: Snapshot,
        change_summary: Option<String>,
    ) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::SaveDraft)?;

        let next = workflow.current_version + 1;
        let activity = NewActivity::new(
            ActivityKind::DraftSaved,
            &actor.user_id,
            json!({ "version": next, "change_summary": change_summary }),
        );
        let version = NewVersion {
            snapshot,
            author_id: actor.user_id.clone(),
            change_summary,
        };
        self.versions.create_version(&workflow, change, version, activity).await
    }

    /// DRAFT → IN_REVIEW: snapshot the content under review and open one
    /// pending review per reviewer, all in one write
    pub async fn submit_for_review(
        &self,
        actor: &Actor,
        id: WorkflowId,
        reviewer_ids: Vec<UserId>,
        snapshot: Option<Snapshot>,
    ) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::SubmitForReview)?;

        let reviewers = self.reviews.validate_reviewers(&reviewer_ids).await?;
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => self.versions.current_snapshot(&workflow).await?,
        };
        self.gate.check(&snapshot)?;

        let next = workflow.current_version + 1;
        let existing = self.store.list_reviews(id).await?;
        let write = WorkflowWrite::against(
            &workflow,
            change,
            NewActivity::new(
                ActivityKind::SubmittedForReview,
                &actor.user_id,
                json!({ "version": next, "reviewers": reviewers }),
            ),
        );
        let reviews = ReviewLedger::plan_requests(&workflow, &existing, &reviewers, next, write.at);
        let write = write
            .with_version(NewVersion {
                snapshot,
                author_id: actor.user_id.clone(),
                change_summary: Some("submitted for review".to_string()),
            })
            .with_reviews(reviews);

        let outcome = self.commit(write).await?;
        tracing::info!(
            "📨 Workflow {} submitted for review at v{} ({} reviewers)",
            id,
            outcome.workflow.current_version,
            reviewers.len()
        );
        Ok(outcome)
    }

    /// Add reviewers to the running round; `None` when every reviewer was already pending
    pub async fn request_reviews(
        &self,
        actor: &Actor,
        id: WorkflowId,
        reviewer_ids: Vec<UserId>,
    ) -> EngineResult<Option<CommitOutcome>> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::RequestReviews)?;
        self.reviews.request_reviews(actor, &workflow, change, &reviewer_ids).await
    }

    /// Record the caller's recommendation; the workflow moves to
    /// AWAITING_APPROVAL in the same write once no review is left pending
    pub async fn submit_review(
        &self,
        actor: &Actor,
        id: WorkflowId,
        recommendation: Recommendation,
        comment: Option<String>,
    ) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::SubmitReview)?;

        let reviewer = &actor.user_id;
        let existing = self.store.list_reviews(id).await?;
        ReviewLedger::ensure_pending(&existing, reviewer)?;

        let write = WorkflowWrite::against(
            &workflow,
            change,
            NewActivity::new(
                ActivityKind::ReviewSubmitted,
                reviewer,
                json!({ "reviewer": reviewer, "recommendation": recommendation }),
            ),
        )
        .with_review_response(ReviewResponse {
            reviewer_id: reviewer.clone(),
            recommendation,
            comment: comment.filter(|c| !c.trim().is_empty()),
        });

        let outcome = self.commit(write).await?;
        if outcome.pending_reviews == 0 {
            tracing::info!("✅ All reviews in for workflow {}; awaiting approval", id);
        } else {
            tracing::info!(
                "📝 Review from {} recorded on workflow {} ({} still pending)",
                reviewer,
                id,
                outcome.pending_reviews
            );
        }
        Ok(outcome)
    }

    /// AWAITING_APPROVAL → APPROVED, capturing the approved content as a final version
    pub async fn approve(&self, actor: &Actor, id: WorkflowId) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::Approve)?;
        self.require(actor, Permission::Approve, Operation::Approve)?;

        let snapshot = self.versions.current_snapshot(&workflow).await?;
        let next = workflow.current_version + 1;
        let write = WorkflowWrite::against(
            &workflow,
            change,
            NewActivity::new(ActivityKind::Approved, &actor.user_id, json!({ "version": next })),
        )
        .with_version(NewVersion {
            snapshot,
            author_id: actor.user_id.clone(),
            change_summary: Some(format!("approved by {}", actor.user_id)),
        });

        let outcome = self.commit(write).await?;
        tracing::info!("🏁 Workflow {} approved by {} at v{}", id, actor.user_id, next);
        Ok(outcome)
    }

    /// AWAITING_APPROVAL → REJECTED; feedback is mandatory
    pub async fn reject(&self, actor: &Actor, id: WorkflowId, feedback: &str) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::Reject)?;
        self.require(actor, Permission::Approve, Operation::Reject)?;

        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(EngineError::validation("rejection feedback is required"));
        }

        let write = WorkflowWrite::against(
            &workflow,
            change,
            NewActivity::new(ActivityKind::Rejected, &actor.user_id, json!({ "feedback": feedback })),
        );
        let outcome = self.commit(write).await?;
        tracing::info!("↩️ Workflow {} rejected by {}", id, actor.user_id);
        Ok(outcome)
    }

    /// REJECTED → DRAFT once the author acknowledges the feedback
    pub async fn resume(&self, actor: &Actor, id: WorkflowId) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::Resume)?;
        if workflow.author_id != actor.user_id && !self.policy.holds(actor, Permission::Override) {
            return Err(EngineError::Forbidden {
                actor: actor.user_id.clone(),
                operation: Operation::Resume,
            });
        }

        let write = WorkflowWrite::against(
            &workflow,
            change,
            NewActivity::new(ActivityKind::Resumed, &actor.user_id, json!({})),
        );
        let outcome = self.commit(write).await?;
        tracing::info!("🔁 Workflow {} resumed as draft by {}", id, actor.user_id);
        Ok(outcome)
    }

    /// APPROVED → DRAFT: open a new amendment cycle on approved content
    pub async fn amend(&self, actor: &Actor, id: WorkflowId) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::Amend)?;
        self.require(actor, Permission::Approve, Operation::Amend)?;

        let write = WorkflowWrite::against(
            &workflow,
            change,
            NewActivity::new(
                ActivityKind::Amended,
                &actor.user_id,
                json!({ "from_version": workflow.current_version }),
            ),
        );
        let outcome = self.commit(write).await?;
        tracing::info!("✏️ Workflow {} reopened for amendment by {}", id, actor.user_id);
        Ok(outcome)
    }

    /// Soft-archive after the parent assessment was deleted
    pub async fn archive(&self, actor: &Actor, id: WorkflowId) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        let change = plan(workflow.state, Operation::Archive)?;

        let write = WorkflowWrite::against(
            &workflow,
            change,
            NewActivity::new(ActivityKind::Archived, &actor.user_id, json!({ "state": workflow.state })),
        )
        .archiving();
        let outcome = self.commit(write).await?;
        tracing::info!("🗄️ Workflow {} archived by {}", id, actor.user_id);
        Ok(outcome)
    }

    pub async fn restore_version(&self, actor: &Actor, id: WorkflowId, number: u32) -> EngineResult<CommitOutcome> {
        let workflow = self.load_active(id).await?;
        self.versions.restore_version(actor, &workflow, number).await
    }

    fn require(&self, actor: &Actor, permission: Permission, operation: Operation) -> EngineResult<()> {
        if self.policy.holds(actor, permission) {
            Ok(())
        } else {
            Err(EngineError::Forbidden {
                actor: actor.user_id.clone(),
                operation,
            })
        }
    }

    async fn commit(&self, write: WorkflowWrite) -> EngineResult<CommitOutcome> {
        let workflow_id = write.workflow_id;
        let kind = write.activity.kind;
        self.store.commit(write).await.map_err(|e| {
            if e.is_retryable() {
                tracing::warn!("⚔️ Lost optimistic lock on workflow {} ({:?}): {}", workflow_id, kind, e);
            }
            e
        })
    }
}

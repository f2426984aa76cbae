/// Review ledger
///
/// Tracks who was asked to review which round and what they recommended.
/// Recommendations are advisory; approving or rejecting is a separate act.
/// Rows are never reopened: a new round after a rejection gets new rows.

use crate::access::{Actor, IdentityDirectory, UserId};
use crate::error::{EngineError, EngineResult};
use crate::storage::{CommitOutcome, NewActivity, WorkflowStore, WorkflowWrite};
use crate::workflow::machine::StateChange;
use crate::workflow::types::{
    ActivityKind, AssessmentWorkflow, Operation, Review, ReviewId, ReviewStatus, WorkflowId,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::{collections::HashSet, sync::Arc};

#[derive(Clone)]
pub struct ReviewLedger {
    store: Arc<dyn WorkflowStore>,
    directory: Arc<dyn IdentityDirectory>,
}

impl ReviewLedger {
    pub fn new(store: Arc<dyn WorkflowStore>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { store, directory }
    }

    /// Deduplicate reviewer ids (keeping order) and require that all resolve
    pub async fn validate_reviewers(&self, reviewer_ids: &[UserId]) -> EngineResult<Vec<UserId>> {
        let mut seen = HashSet::new();
        let reviewers: Vec<UserId> = reviewer_ids
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        if reviewers.is_empty() {
            return Err(EngineError::validation("at least one reviewer is required"));
        }

        let unresolved = self.directory.unresolved(&reviewers).await?;
        if !unresolved.is_empty() {
            let names: Vec<&str> = unresolved.iter().map(UserId::as_str).collect();
            return Err(EngineError::validation(format!(
                "unknown reviewers: {}",
                names.join(", ")
            )));
        }

        Ok(reviewers)
    }

    /// New pending rows for reviewers that have no pending review yet
    pub fn plan_requests(
        workflow: &AssessmentWorkflow,
        existing: &[Review],
        reviewers: &[UserId],
        version_number: u32,
        at: DateTime<Utc>,
    ) -> Vec<Review> {
        let pending: HashSet<&UserId> = existing
            .iter()
            .filter(|review| review.is_pending())
            .map(|review| &review.reviewer_id)
            .collect();

        reviewers
            .iter()
            .filter(|reviewer| !pending.contains(reviewer))
            .map(|reviewer| Review {
                id: ReviewId::new(),
                workflow_id: workflow.id,
                reviewer_id: reviewer.clone(),
                version_number,
                status: ReviewStatus::Pending,
                recommendation: None,
                comment: None,
                requested_at: at,
                responded_at: None,
            })
            .collect()
    }

    /// Add reviewers to the current round. Already-pending reviewers are
    /// skipped; when nobody new remains nothing is written and `None` is returned.
    pub async fn request_reviews(
        &self,
        actor: &Actor,
        workflow: &AssessmentWorkflow,
        change: StateChange,
        reviewer_ids: &[UserId],
    ) -> EngineResult<Option<CommitOutcome>> {
        let reviewers = self.validate_reviewers(reviewer_ids).await?;
        let existing = self.store.list_reviews(workflow.id).await?;

        let write = WorkflowWrite::against(
            workflow,
            change,
            NewActivity::new(ActivityKind::ReviewsRequested, &actor.user_id, json!({})),
        );
        let reviews = Self::plan_requests(workflow, &existing, &reviewers, workflow.current_version, write.at);
        if reviews.is_empty() {
            tracing::debug!("📋 All requested reviewers already pending on workflow {}", workflow.id);
            return Ok(None);
        }

        let added: Vec<&UserId> = reviews.iter().map(|r| &r.reviewer_id).collect();
        let mut write = write;
        write.activity.payload = json!({ "reviewers": added });
        let count = reviews.len();

        let outcome = self.store.commit(write.with_reviews(reviews)).await?;
        tracing::info!("📋 Requested {} more reviews on workflow {}", count, workflow.id);
        Ok(Some(outcome))
    }

    /// Require that `reviewer` has a pending review
    ///
    /// Someone who was never asked is `Forbidden`; someone who already answered
    /// gets `ValidationFailed`.
    pub fn ensure_pending(reviews: &[Review], reviewer: &UserId) -> EngineResult<()> {
        let mut assigned = false;
        for review in reviews.iter().filter(|r| &r.reviewer_id == reviewer) {
            if review.is_pending() {
                return Ok(());
            }
            assigned = true;
        }

        if assigned {
            Err(EngineError::validation(format!(
                "{} has already submitted their review",
                reviewer
            )))
        } else {
            Err(EngineError::Forbidden {
                actor: reviewer.clone(),
                operation: Operation::SubmitReview,
            })
        }
    }

    pub async fn list_reviews(&self, id: WorkflowId) -> EngineResult<Vec<Review>> {
        self.store.list_reviews(id).await
    }
}

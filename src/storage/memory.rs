/// In-memory workflow store
///
/// All tables live behind one async RwLock, so every write is applied as a unit:
/// it is validated completely before anything is mutated.

use super::{CommitOutcome, NewActivity, WorkflowStore, WorkflowWrite};
use crate::error::{Entity, EngineError, EngineResult};
use crate::workflow::types::{
    ActivityEvent, AssessmentWorkflow, AxisComment, AxisId, CommentId, Cursor, Review, ReviewStatus,
    Version, WorkflowId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<WorkflowId, AssessmentWorkflow>,
    by_assessment: HashMap<String, WorkflowId>,
    versions: HashMap<WorkflowId, Vec<Version>>,
    reviews: HashMap<WorkflowId, Vec<Review>>,
    /// Creation order
    comments: Vec<AxisComment>,
    activity: Vec<ActivityEvent>,
    last_cursor: i64,
}

impl Tables {
    fn workflow(&self, id: WorkflowId) -> EngineResult<&AssessmentWorkflow> {
        self.workflows
            .get(&id)
            .ok_or_else(|| EngineError::not_found(Entity::Workflow, id))
    }

    fn append_activity(
        &mut self,
        workflow: &AssessmentWorkflow,
        activity: NewActivity,
        at: DateTime<Utc>,
    ) -> ActivityEvent {
        self.last_cursor += 1;
        let event = ActivityEvent {
            cursor: Cursor(self.last_cursor),
            workflow_id: workflow.id,
            kind: activity.kind,
            actor_id: activity.actor_id,
            payload: activity.payload,
            state: workflow.state,
            version: workflow.current_version,
            created_at: at,
        };
        self.activity.push(event.clone());
        event
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh DRAFT workflow at v1 directly (test fixture)
    #[cfg(test)]
    pub async fn seed_workflow(&self, assessment_id: &str, author: &str) -> AssessmentWorkflow {
        use crate::access::UserId;
        use crate::workflow::types::{ActivityKind, Snapshot, WorkflowState};

        let now = Utc::now();
        let workflow = AssessmentWorkflow {
            id: WorkflowId::new(),
            assessment_id: assessment_id.to_string(),
            author_id: UserId::from(author),
            state: WorkflowState::Draft,
            current_version: 1,
            created_at: now,
            updated_at: now,
            archived_at: None,
        };
        let version = Version {
            workflow_id: workflow.id,
            version_number: 1,
            snapshot: Snapshot::default(),
            author_id: workflow.author_id.clone(),
            change_summary: None,
            created_at: now,
        };
        let activity = NewActivity::new(ActivityKind::Initialized, &workflow.author_id, serde_json::json!({}));
        self.create_workflow(&workflow, &version, activity)
            .await
            .expect("seed workflow")
            .expect("fresh assessment");
        workflow
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_workflow(
        &self,
        workflow: &AssessmentWorkflow,
        first_version: &Version,
        activity: NewActivity,
    ) -> EngineResult<Option<ActivityEvent>> {
        let mut tables = self.tables.write().await;
        if tables.by_assessment.contains_key(&workflow.assessment_id) {
            return Ok(None);
        }

        tables.by_assessment.insert(workflow.assessment_id.clone(), workflow.id);
        tables.workflows.insert(workflow.id, workflow.clone());
        tables.versions.insert(workflow.id, vec![first_version.clone()]);
        Ok(Some(tables.append_activity(workflow, activity, workflow.created_at)))
    }

    async fn get_workflow(&self, id: WorkflowId) -> EngineResult<Option<AssessmentWorkflow>> {
        Ok(self.tables.read().await.workflows.get(&id).cloned())
    }

    async fn find_by_assessment(&self, assessment_id: &str) -> EngineResult<Option<AssessmentWorkflow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_assessment
            .get(assessment_id)
            .and_then(|id| tables.workflows.get(id))
            .cloned())
    }

    async fn commit(&self, write: WorkflowWrite) -> EngineResult<CommitOutcome> {
        let mut tables = self.tables.write().await;
        let current = tables.workflow(write.workflow_id)?.clone();

        if current.is_archived()
            || current.state != write.expected_state
            || current.current_version != write.expected_version
        {
            return Err(write.conflict());
        }

        let reviews = tables.reviews.get(&write.workflow_id).map(Vec::as_slice).unwrap_or(&[]);
        let answered = match &write.review_response {
            Some(response) => match reviews
                .iter()
                .position(|r| r.is_pending() && r.reviewer_id == response.reviewer_id)
            {
                Some(idx) => Some(idx),
                // Someone answered this review since the caller read it
                None => return Err(write.conflict()),
            },
            None => None,
        };
        // A reviewer holds at most one open review
        let reopened = write
            .new_reviews
            .iter()
            .any(|new| reviews.iter().any(|r| r.is_pending() && r.reviewer_id == new.reviewer_id));
        if reopened {
            return Err(write.conflict());
        }
        let pending_before = reviews.iter().filter(|r| r.is_pending()).count();
        let pending_reviews = write.pending_after(pending_before);

        let mut workflow = current;
        workflow.state = write.change.resolve(workflow.state, pending_reviews);
        workflow.updated_at = write.at;
        if write.archive {
            workflow.archived_at = Some(write.at);
        }

        let version = write.version.map(|new| {
            workflow.current_version += 1;
            Version {
                workflow_id: workflow.id,
                version_number: workflow.current_version,
                snapshot: new.snapshot,
                author_id: new.author_id,
                change_summary: new.change_summary,
                created_at: write.at,
            }
        });
        if let Some(version) = &version {
            tables.versions.entry(workflow.id).or_default().push(version.clone());
        }

        let rows = tables.reviews.entry(workflow.id).or_default();
        let review = match (answered, write.review_response) {
            (Some(idx), Some(response)) => {
                let row = &mut rows[idx];
                row.status = ReviewStatus::Submitted;
                row.recommendation = Some(response.recommendation);
                row.comment = response.comment;
                row.responded_at = Some(write.at);
                Some(row.clone())
            }
            _ => None,
        };
        rows.extend(write.new_reviews);

        tables.workflows.insert(workflow.id, workflow.clone());
        let event = tables.append_activity(&workflow, write.activity, write.at);

        Ok(CommitOutcome {
            workflow,
            version,
            review,
            pending_reviews,
            event,
        })
    }

    async fn get_version(&self, id: WorkflowId, number: u32) -> EngineResult<Option<Version>> {
        let tables = self.tables.read().await;
        Ok(tables
            .versions
            .get(&id)
            .and_then(|versions| versions.iter().find(|v| v.version_number == number))
            .cloned())
    }

    async fn list_versions(&self, id: WorkflowId) -> EngineResult<Vec<Version>> {
        Ok(self.tables.read().await.versions.get(&id).cloned().unwrap_or_default())
    }

    async fn list_reviews(&self, id: WorkflowId) -> EngineResult<Vec<Review>> {
        Ok(self.tables.read().await.reviews.get(&id).cloned().unwrap_or_default())
    }

    async fn insert_comment(&self, comment: &AxisComment, activity: NewActivity) -> EngineResult<ActivityEvent> {
        let mut tables = self.tables.write().await;
        let workflow = tables.workflow(comment.workflow_id)?.clone();
        tables.comments.push(comment.clone());
        Ok(tables.append_activity(&workflow, activity, comment.created_at))
    }

    async fn get_comment(&self, id: CommentId) -> EngineResult<Option<AxisComment>> {
        let tables = self.tables.read().await;
        Ok(tables.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn list_comments(&self, id: WorkflowId, axis: Option<&AxisId>) -> EngineResult<Vec<AxisComment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .comments
            .iter()
            .filter(|c| c.workflow_id == id && axis.map_or(true, |axis| &c.axis_id == axis))
            .cloned()
            .collect())
    }

    async fn resolve_comments(
        &self,
        id: WorkflowId,
        comment_ids: &[CommentId],
        activity: NewActivity,
    ) -> EngineResult<ActivityEvent> {
        let mut tables = self.tables.write().await;
        let workflow = tables.workflow(id)?.clone();
        for comment in tables.comments.iter_mut() {
            if comment.workflow_id == id && comment_ids.contains(&comment.id) {
                comment.resolved = true;
            }
        }
        Ok(tables.append_activity(&workflow, activity, Utc::now()))
    }

    async fn list_activity(&self, id: WorkflowId, after: Cursor, limit: usize) -> EngineResult<Vec<ActivityEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .activity
            .iter()
            .filter(|e| e.workflow_id == id && e.cursor > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_activity(&self, id: WorkflowId) -> EngineResult<Option<ActivityEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.activity.iter().rev().find(|e| e.workflow_id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::UserId;
    use crate::storage::{NewVersion, ReviewResponse};
    use crate::workflow::machine::StateChange;
    use crate::workflow::reviews::ReviewLedger;
    use crate::workflow::types::{ActivityKind, Recommendation, ReviewId, Snapshot, WorkflowState};
    use serde_json::json;

    fn note(kind: ActivityKind) -> NewActivity {
        NewActivity::new(kind, &UserId::from("author1"), json!({}))
    }

    fn next_version() -> NewVersion {
        NewVersion {
            snapshot: Snapshot::default(),
            author_id: UserId::from("author1"),
            change_summary: None,
        }
    }

    fn pending(workflow: &AssessmentWorkflow, reviewer: &str) -> Review {
        Review {
            id: ReviewId::new(),
            workflow_id: workflow.id,
            reviewer_id: UserId::from(reviewer),
            version_number: 2,
            status: ReviewStatus::Pending,
            recommendation: None,
            comment: None,
            requested_at: Utc::now(),
            responded_at: None,
        }
    }

    #[tokio::test]
    async fn second_writer_from_the_same_read_loses() {
        let store = InMemoryStore::new();
        let wf = store.seed_workflow("a1", "author1").await;

        let first = WorkflowWrite::against(&wf, StateChange::Stay, note(ActivityKind::DraftSaved))
            .with_version(next_version());
        let second = first.clone();

        let outcome = store.commit(first).await.unwrap();
        assert_eq!(outcome.workflow.current_version, 2);
        assert_eq!(outcome.version.unwrap().version_number, 2);

        let err = store.commit(second).await.unwrap_err();
        assert!(matches!(err, EngineError::ConcurrentVersionConflict { attempted: 2, .. }));
        assert_eq!(store.list_versions(wf.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn last_review_settles_the_round_in_the_same_write() {
        let store = InMemoryStore::new();
        let wf = store.seed_workflow("a1", "author1").await;
        let submitted = store
            .commit(
                WorkflowWrite::against(
                    &wf,
                    StateChange::To(WorkflowState::InReview),
                    note(ActivityKind::SubmittedForReview),
                )
                .with_version(next_version())
                .with_reviews(vec![pending(&wf, "r1"), pending(&wf, "r2")]),
            )
            .await
            .unwrap();
        assert_eq!(submitted.pending_reviews, 2);

        let settle = StateChange::WhenReviewsSettled(WorkflowState::AwaitingApproval);
        let respond = |wf: &AssessmentWorkflow, reviewer: &str| {
            WorkflowWrite::against(wf, settle, note(ActivityKind::ReviewSubmitted)).with_review_response(
                ReviewResponse {
                    reviewer_id: UserId::from(reviewer),
                    recommendation: Recommendation::Approve,
                    comment: None,
                },
            )
        };

        let first = store.commit(respond(&submitted.workflow, "r1")).await.unwrap();
        assert_eq!(first.workflow.state, WorkflowState::InReview);
        assert_eq!(first.pending_reviews, 1);
        assert_eq!(first.review.unwrap().status, ReviewStatus::Submitted);

        let last = store.commit(respond(&first.workflow, "r2")).await.unwrap();
        assert_eq!(last.workflow.state, WorkflowState::AwaitingApproval);
        assert_eq!(last.event.state, WorkflowState::AwaitingApproval);
        assert_eq!(last.workflow.current_version, 2);
    }

    #[tokio::test]
    async fn stale_review_requests_cannot_reopen_a_pending_reviewer() {
        let store = InMemoryStore::new();
        let wf = store.seed_workflow("a1", "author1").await;
        let in_review = store
            .commit(
                WorkflowWrite::against(&wf, StateChange::To(WorkflowState::InReview), note(ActivityKind::SubmittedForReview))
                    .with_version(next_version())
                    .with_reviews(vec![pending(&wf, "r1")]),
            )
            .await
            .unwrap()
            .workflow;

        let existing = store.list_reviews(wf.id).await.unwrap();
        let request = || {
            let write = WorkflowWrite::against(&in_review, StateChange::Stay, note(ActivityKind::ReviewsRequested));
            let reviews = ReviewLedger::plan_requests(&in_review, &existing, &[UserId::from("r3")], 2, write.at);
            write.with_reviews(reviews)
        };

        store.commit(request()).await.unwrap();
        let err = store.commit(request()).await.unwrap_err();
        assert!(err.is_retryable());

        let open_for_r3 = store
            .list_reviews(wf.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_pending() && r.reviewer_id == UserId::from("r3"))
            .count();
        assert_eq!(open_for_r3, 1);
    }

    #[tokio::test]
    async fn activity_cursors_only_move_forward() {
        let store = InMemoryStore::new();
        let a = store.seed_workflow("a1", "author1").await;
        let b = store.seed_workflow("a2", "author1").await;
        store
            .commit(WorkflowWrite::against(&a, StateChange::Stay, note(ActivityKind::DraftSaved)).with_version(next_version()))
            .await
            .unwrap();

        let events = store.list_activity(a.id, Cursor::START, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].cursor < events[1].cursor);
        assert!(store.list_activity(a.id, events[1].cursor, 10).await.unwrap().is_empty());
        assert_eq!(store.list_activity(b.id, Cursor::START, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_assessment_is_not_created_twice() {
        let store = InMemoryStore::new();
        let wf = store.seed_workflow("a1", "author1").await;
        let mut other = wf.clone();
        other.id = WorkflowId::new();
        let version = store.get_version(wf.id, 1).await.unwrap().unwrap();
        let created = store
            .create_workflow(&other, &version, note(ActivityKind::Initialized))
            .await
            .unwrap();
        assert!(created.is_none());
        assert_eq!(store.find_by_assessment("a1").await.unwrap().unwrap().id, wf.id);
    }
}

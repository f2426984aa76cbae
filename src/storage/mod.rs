/// Storage collaborator
///
/// Abstracts durable persistence for workflows, versions, reviews, comments and
/// activity. Every state-changing operation is expressed as one atomic unit
/// (`WorkflowWrite`, `insert_comment`, `resolve_comments`) that also appends its
/// activity event, so the feed never has gaps.
///
/// Concurrency contract: `commit` is a compare-and-set on the workflow's
/// `(state, current_version)` pair. A writer whose expectation no longer holds
/// gets `ConcurrentVersionConflict` and nothing is written.

// In-memory backend (tests and single-process deployments)
pub mod memory;

// SQLite backend using sqlx
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::access::UserId;
use crate::error::{EngineError, EngineResult};
use crate::workflow::machine::StateChange;
use crate::workflow::types::{
    ActivityEvent, ActivityKind, AssessmentWorkflow, AxisComment, AxisId, CommentId, Cursor,
    Recommendation, Review, Snapshot, Version, WorkflowId, WorkflowState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Activity to append alongside a write; cursor, state and version are
/// stamped by the store from the write's outcome
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub kind: ActivityKind,
    pub actor_id: UserId,
    pub payload: Value,
}

impl NewActivity {
    pub fn new(kind: ActivityKind, actor_id: &UserId, payload: Value) -> Self {
        Self {
            kind,
            actor_id: actor_id.clone(),
            payload,
        }
    }
}

/// Content of the next version; its number is always `expected_version + 1`
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub snapshot: Snapshot,
    pub author_id: UserId,
    pub change_summary: Option<String>,
}

/// A reviewer's answer to their pending review
#[derive(Debug, Clone)]
pub struct ReviewResponse {
    pub reviewer_id: UserId,
    pub recommendation: Recommendation,
    pub comment: Option<String>,
}

/// One atomic lifecycle write
#[derive(Debug, Clone)]
pub struct WorkflowWrite {
    pub workflow_id: WorkflowId,
    pub expected_state: WorkflowState,
    pub expected_version: u32,
    pub change: StateChange,
    pub version: Option<NewVersion>,
    pub new_reviews: Vec<Review>,
    pub review_response: Option<ReviewResponse>,
    pub archive: bool,
    pub activity: NewActivity,
    pub at: DateTime<Utc>,
}

impl WorkflowWrite {
    /// Start a write guarded by the workflow as the caller last read it
    pub fn against(workflow: &AssessmentWorkflow, change: StateChange, activity: NewActivity) -> Self {
        Self {
            workflow_id: workflow.id,
            expected_state: workflow.state,
            expected_version: workflow.current_version,
            change,
            version: None,
            new_reviews: Vec::new(),
            review_response: None,
            archive: false,
            activity,
            at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: NewVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_reviews(mut self, reviews: Vec<Review>) -> Self {
        self.new_reviews = reviews;
        self
    }

    pub fn with_review_response(mut self, response: ReviewResponse) -> Self {
        self.review_response = Some(response);
        self
    }

    pub fn archiving(mut self) -> Self {
        self.archive = true;
        self
    }

    /// Version number claimed by this write, if it appends one
    pub fn claimed_version(&self) -> Option<u32> {
        self.version.as_ref().map(|_| self.expected_version + 1)
    }

    /// Number reported when the compare-and-set is lost
    pub fn attempted_version(&self) -> u32 {
        self.claimed_version().unwrap_or(self.expected_version)
    }

    /// The error a backend reports when this write loses the compare-and-set
    pub fn conflict(&self) -> EngineError {
        EngineError::ConcurrentVersionConflict {
            workflow_id: self.workflow_id,
            attempted: self.attempted_version(),
        }
    }

    /// Reviews pending once this write is applied, given those pending before it
    pub fn pending_after(&self, pending_before: usize) -> usize {
        let answered = usize::from(self.review_response.is_some());
        pending_before.saturating_sub(answered) + self.new_reviews.len()
    }
}

/// Everything a successful commit produced
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub workflow: AssessmentWorkflow,
    pub version: Option<Version>,
    /// The review row updated by a review response
    pub review: Option<Review>,
    /// Reviews still pending after the write
    pub pending_reviews: usize,
    pub event: ActivityEvent,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new workflow with its first version. Returns `None` without
    /// writing when the assessment already has a workflow.
    async fn create_workflow(
        &self,
        workflow: &AssessmentWorkflow,
        first_version: &Version,
        activity: NewActivity,
    ) -> EngineResult<Option<ActivityEvent>>;

    async fn get_workflow(&self, id: WorkflowId) -> EngineResult<Option<AssessmentWorkflow>>;

    async fn find_by_assessment(&self, assessment_id: &str) -> EngineResult<Option<AssessmentWorkflow>>;

    /// Apply a lifecycle write atomically (see module docs for the CAS contract)
    async fn commit(&self, write: WorkflowWrite) -> EngineResult<CommitOutcome>;

    async fn get_version(&self, id: WorkflowId, number: u32) -> EngineResult<Option<Version>>;

    /// All versions, oldest first
    async fn list_versions(&self, id: WorkflowId) -> EngineResult<Vec<Version>>;

    /// All reviews ever requested, in request order
    async fn list_reviews(&self, id: WorkflowId) -> EngineResult<Vec<Review>>;

    async fn insert_comment(&self, comment: &AxisComment, activity: NewActivity) -> EngineResult<ActivityEvent>;

    async fn get_comment(&self, id: CommentId) -> EngineResult<Option<AxisComment>>;

    /// Comments of a workflow in creation order, optionally limited to one axis
    async fn list_comments(&self, id: WorkflowId, axis: Option<&AxisId>) -> EngineResult<Vec<AxisComment>>;

    /// Mark the given comments resolved in one unit with its activity event
    async fn resolve_comments(
        &self,
        id: WorkflowId,
        comment_ids: &[CommentId],
        activity: NewActivity,
    ) -> EngineResult<ActivityEvent>;

    /// Events strictly after `after`, oldest first, at most `limit`
    async fn list_activity(&self, id: WorkflowId, after: Cursor, limit: usize) -> EngineResult<Vec<ActivityEvent>>;

    async fn latest_activity(&self, id: WorkflowId) -> EngineResult<Option<ActivityEvent>>;
}

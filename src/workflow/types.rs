/// Core assessment workflow type definitions
///
/// Defines the persisted entities (workflow, version, review, axis comment, activity)
/// and the identifiers that tie them together. These types are serialized to JSON
/// for the HTTP layer and mapped column-by-column by the storage backends.

use crate::access::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

/// Unique identifier of one assessment workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier of one review assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub Uuid);

impl ReviewId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of one axis comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maturity axis identifier (e.g. "strategy", "technology")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisId(pub String);

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AxisId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Position in the activity feed. Cursors only move forward; `Cursor::START`
/// reads from the beginning of a workflow's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub i64);

impl Cursor {
    pub const START: Cursor = Cursor(0);
}

/// Lifecycle state of an assessment workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Draft,
    InReview,
    AwaitingApproval,
    Approved,
    Rejected,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 5] = [
        WorkflowState::Draft,
        WorkflowState::InReview,
        WorkflowState::AwaitingApproval,
        WorkflowState::Approved,
        WorkflowState::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Draft => "DRAFT",
            WorkflowState::InReview => "IN_REVIEW",
            WorkflowState::AwaitingApproval => "AWAITING_APPROVAL",
            WorkflowState::Approved => "APPROVED",
            WorkflowState::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown workflow state: {}", s))
    }
}

/// Every verb the engine exposes. Used for permission checks, transition
/// validation and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Initialize,
    SaveDraft,
    SubmitForReview,
    RequestReviews,
    SubmitReview,
    Approve,
    Reject,
    Resume,
    Amend,
    Archive,
    RestoreVersion,
    AddComment,
    ResolveComment,
    Heartbeat,
    Leave,
    ListActive,
    ListActivity,
    ListVersions,
    GetVersion,
    ListReviews,
    ListComments,
    GetWorkflow,
    Advise,
    ConfigureRoles,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::SaveDraft => "saveDraft",
            Operation::SubmitForReview => "submitForReview",
            Operation::RequestReviews => "requestReviews",
            Operation::SubmitReview => "submitReview",
            Operation::Approve => "approve",
            Operation::Reject => "reject",
            Operation::Resume => "resume",
            Operation::Amend => "amend",
            Operation::Archive => "archive",
            Operation::RestoreVersion => "restoreVersion",
            Operation::AddComment => "addComment",
            Operation::ResolveComment => "resolveComment",
            Operation::Heartbeat => "heartbeat",
            Operation::Leave => "leave",
            Operation::ListActive => "listActive",
            Operation::ListActivity => "listActivity",
            Operation::ListVersions => "listVersions",
            Operation::GetVersion => "getVersion",
            Operation::ListReviews => "listReviews",
            Operation::ListComments => "listComments",
            Operation::GetWorkflow => "getWorkflow",
            Operation::Advise => "advise",
            Operation::ConfigureRoles => "configureRoles",
        }
    }

    /// Operations governed by the lifecycle transition table
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            Operation::SaveDraft
                | Operation::SubmitForReview
                | Operation::RequestReviews
                | Operation::SubmitReview
                | Operation::Approve
                | Operation::Reject
                | Operation::Resume
                | Operation::Amend
                | Operation::RestoreVersion
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One workflow per assessment, tracking lifecycle state and the version counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentWorkflow {
    pub id: WorkflowId,
    /// Owning assessment; at most one workflow exists per assessment
    pub assessment_id: String,
    /// Identity that initialized the workflow (the original author)
    pub author_id: UserId,
    pub state: WorkflowState,
    /// Number of the latest version; starts at 1 and only ever grows
    pub current_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the parent assessment was deleted; the row itself is kept
    pub archived_at: Option<DateTime<Utc>>,
}

impl AssessmentWorkflow {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Structured answers plus derived axis scores at one point in time
///
/// The engine treats answers as opaque JSON per axis; scores are produced by an
/// external scoring function and carried along unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub answers: BTreeMap<AxisId, Value>,
    #[serde(default)]
    pub axis_scores: BTreeMap<AxisId, f64>,
}

/// Immutable snapshot of a workflow's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub workflow_id: WorkflowId,
    pub version_number: u32,
    pub snapshot: Snapshot,
    pub author_id: UserId,
    pub change_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Submitted,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "PENDING",
            ReviewStatus::Submitted => "SUBMITTED",
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReviewStatus::Pending),
            "SUBMITTED" => Ok(ReviewStatus::Submitted),
            other => Err(anyhow::anyhow!("Unknown review status: {}", other)),
        }
    }
}

/// A reviewer's advisory recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approve,
    ApproveWithComments,
    Reject,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Approve => "APPROVE",
            Recommendation::ApproveWithComments => "APPROVE_WITH_COMMENTS",
            Recommendation::Reject => "REJECT",
        }
    }
}

impl FromStr for Recommendation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROVE" => Ok(Recommendation::Approve),
            "APPROVE_WITH_COMMENTS" => Ok(Recommendation::ApproveWithComments),
            "REJECT" => Ok(Recommendation::Reject),
            other => Err(anyhow::anyhow!("Unknown recommendation: {}", other)),
        }
    }
}

/// One stakeholder's assignment to review a workflow round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub workflow_id: WorkflowId,
    pub reviewer_id: UserId,
    /// Version that was under review when the assignment was made
    pub version_number: u32,
    pub status: ReviewStatus,
    pub recommendation: Option<Recommendation>,
    pub comment: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }
}

/// Threaded discussion item anchored to one axis of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisComment {
    pub id: CommentId,
    pub workflow_id: WorkflowId,
    pub axis_id: AxisId,
    /// None for the root of a thread
    pub parent_id: Option<CommentId>,
    pub author_id: UserId,
    pub body: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// Kinds of notable events recorded in the activity feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Initialized,
    DraftSaved,
    SubmittedForReview,
    ReviewsRequested,
    ReviewSubmitted,
    Approved,
    Rejected,
    Resumed,
    Amended,
    Archived,
    VersionRestored,
    CommentAdded,
    CommentResolved,
}

impl ActivityKind {
    const ALL: [ActivityKind; 13] = [
        ActivityKind::Initialized,
        ActivityKind::DraftSaved,
        ActivityKind::SubmittedForReview,
        ActivityKind::ReviewsRequested,
        ActivityKind::ReviewSubmitted,
        ActivityKind::Approved,
        ActivityKind::Rejected,
        ActivityKind::Resumed,
        ActivityKind::Amended,
        ActivityKind::Archived,
        ActivityKind::VersionRestored,
        ActivityKind::CommentAdded,
        ActivityKind::CommentResolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Initialized => "INITIALIZED",
            ActivityKind::DraftSaved => "DRAFT_SAVED",
            ActivityKind::SubmittedForReview => "SUBMITTED_FOR_REVIEW",
            ActivityKind::ReviewsRequested => "REVIEWS_REQUESTED",
            ActivityKind::ReviewSubmitted => "REVIEW_SUBMITTED",
            ActivityKind::Approved => "APPROVED",
            ActivityKind::Rejected => "REJECTED",
            ActivityKind::Resumed => "RESUMED",
            ActivityKind::Amended => "AMENDED",
            ActivityKind::Archived => "ARCHIVED",
            ActivityKind::VersionRestored => "VERSION_RESTORED",
            ActivityKind::CommentAdded => "COMMENT_ADDED",
            ActivityKind::CommentResolved => "COMMENT_RESOLVED",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown activity kind: {}", s))
    }
}

/// Append-only record of one state-changing operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub cursor: Cursor,
    pub workflow_id: WorkflowId,
    pub kind: ActivityKind,
    pub actor_id: UserId,
    /// Small structured summary of the change
    pub payload: Value,
    /// Workflow state right after the operation
    pub state: WorkflowState,
    /// Workflow version right after the operation
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

/// What every mutating verb returns: enough for a caller to reconcile its view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: WorkflowId,
    pub assessment_id: String,
    pub state: WorkflowState,
    pub current_version: u32,
    pub archived: bool,
    pub updated_at: DateTime<Utc>,
    pub last_activity: Option<ActivityEvent>,
}

impl WorkflowSummary {
    pub fn new(workflow: &AssessmentWorkflow, last_activity: Option<ActivityEvent>) -> Self {
        Self {
            workflow_id: workflow.id,
            assessment_id: workflow.assessment_id.clone(),
            state: workflow.state,
            current_version: workflow.current_version,
            archived: workflow.is_archived(),
            updated_at: workflow.updated_at,
            last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_state_round_trips_through_storage_names() {
        for state in WorkflowState::ALL {
            assert_eq!(state.as_str().parse::<WorkflowState>().unwrap(), state);
        }
        assert!("PUBLISHED".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn workflow_state_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&WorkflowState::AwaitingApproval).unwrap();
        assert_eq!(json, "\"AWAITING_APPROVAL\"");
    }

    #[test]
    fn snapshot_uses_axis_ids_as_map_keys() {
        let mut snapshot = Snapshot::default();
        snapshot.answers.insert(AxisId::from("strategy"), serde_json::json!({"q1": 3}));
        snapshot.axis_scores.insert(AxisId::from("strategy"), 2.5);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["answers"]["strategy"]["q1"], 3);
        assert_eq!(json["axis_scores"]["strategy"], 2.5);

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn lifecycle_operations_exclude_reads_and_comments() {
        assert!(Operation::SubmitForReview.is_lifecycle());
        assert!(Operation::RestoreVersion.is_lifecycle());
        assert!(!Operation::AddComment.is_lifecycle());
        assert!(!Operation::Heartbeat.is_lifecycle());
        assert!(!Operation::Archive.is_lifecycle());
    }
}

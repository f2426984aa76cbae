/// Assessment Workflow Layer
///
/// This module owns the lifecycle of an assessment workflow:
/// - Type definitions (workflow, version, review, comment, activity)
/// - The transition table and the state machine that enforces it
/// - Append-only version history with copy-forward restore
/// - Review rounds and threaded axis comments

// Core workflow type definitions
pub mod types;

// Transition table and lifecycle operations
pub mod machine;

// Completeness gate checked before submission
pub mod gate;

// Version history and restore
pub mod versions;

// Reviewer assignments and recommendations
pub mod reviews;

// Depth-limited comment threads per axis
pub mod comments;

// Re-export commonly used types
pub use comments::{CommentPosted, CommentThreadStore, ResolveOutcome, MAX_THREAD_DEPTH};
pub use gate::{AnswerCoverage, CompletenessGate, CompletenessGauge};
pub use machine::{plan, Initialized, StateChange, WorkflowStateMachine};
pub use reviews::ReviewLedger;
pub use types::{
    ActivityEvent, ActivityKind, AssessmentWorkflow, AxisComment, AxisId, CommentId, Cursor, Operation,
    Recommendation, Review, ReviewId, ReviewStatus, Snapshot, Version, WorkflowId, WorkflowState,
    WorkflowSummary,
};
pub use versions::VersionStore;

/// SQLite persistence for workflows
///
/// One row per workflow, version, review, comment and activity event. Snapshots
/// and activity payloads are JSON text columns. Every `WorkflowStore` write runs
/// in a single transaction whose first statement is the compare-and-set on the
/// workflow row, so competing writers queue on SQLite's write lock and the
/// loser sees zero affected rows.

use super::{CommitOutcome, NewActivity, WorkflowStore, WorkflowWrite};
use crate::access::UserId;
use crate::error::{Entity, EngineError, EngineResult};
use crate::workflow::types::{
    ActivityEvent, AssessmentWorkflow, AxisComment, AxisId, CommentId, Cursor, Review, ReviewId,
    ReviewStatus, Version, WorkflowId,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, Transaction,
};
use std::{path::Path, str::FromStr, time::Duration};
use uuid::Uuid;

const SCHEMA: [&str; 10] = [
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        assessment_id TEXT NOT NULL UNIQUE,
        author_id TEXT NOT NULL,
        state TEXT NOT NULL,
        current_version INTEGER NOT NULL,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        archived_at TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS versions (
        workflow_id TEXT NOT NULL REFERENCES workflows(id),
        version_number INTEGER NOT NULL,
        snapshot JSON NOT NULL,
        author_id TEXT NOT NULL,
        change_summary TEXT,
        created_at TIMESTAMP NOT NULL,
        PRIMARY KEY (workflow_id, version_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL REFERENCES workflows(id),
        reviewer_id TEXT NOT NULL,
        version_number INTEGER NOT NULL,
        status TEXT NOT NULL,
        recommendation TEXT,
        comment TEXT,
        requested_at TIMESTAMP NOT NULL,
        responded_at TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reviews_workflow ON reviews(workflow_id, status)",
    // A reviewer holds at most one open review per workflow
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_reviews_open ON reviews(workflow_id, reviewer_id) WHERE status = 'PENDING'",
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL REFERENCES workflows(id),
        axis_id TEXT NOT NULL,
        parent_id TEXT REFERENCES comments(id),
        author_id TEXT NOT NULL,
        body TEXT NOT NULL,
        resolved BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMP NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_thread ON comments(workflow_id, axis_id)",
    r#"
    CREATE TABLE IF NOT EXISTS activity (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id TEXT NOT NULL REFERENCES workflows(id),
        kind TEXT NOT NULL,
        actor_id TEXT NOT NULL,
        payload JSON NOT NULL,
        state TEXT NOT NULL,
        version INTEGER NOT NULL,
        created_at TIMESTAMP NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_activity_workflow ON activity(workflow_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_workflows_assessment ON workflows(assessment_id)",
];

/// SQLite-backed `WorkflowStore`
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file under `data_dir` and apply the schema
    pub async fn connect(data_dir: &str, file_name: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory '{}'", data_dir))?;
        let db_path = Path::new(data_dir).join(file_name);

        tracing::info!("🗄️ Opening workflow database: {}", db_path.display());
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options).await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        tracing::info!("✅ Workflow database ready: {}", db_path.display());
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes. Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn parse_uuid(raw: &str) -> EngineResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| EngineError::Storage(anyhow::anyhow!("corrupt id '{}': {}", raw, e)))
}

fn number(raw: i64) -> EngineResult<u32> {
    u32::try_from(raw).map_err(|_| EngineError::Storage(anyhow::anyhow!("version number out of range: {}", raw)))
}

fn workflow_from_row(row: &SqliteRow) -> EngineResult<AssessmentWorkflow> {
    let id: String = row.try_get("id")?;
    let state: String = row.try_get("state")?;
    Ok(AssessmentWorkflow {
        id: WorkflowId(parse_uuid(&id)?),
        assessment_id: row.try_get("assessment_id")?,
        author_id: UserId(row.try_get("author_id")?),
        state: state.parse()?,
        current_version: number(row.try_get("current_version")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        archived_at: row.try_get("archived_at")?,
    })
}

fn version_from_row(row: &SqliteRow) -> EngineResult<Version> {
    let workflow_id: String = row.try_get("workflow_id")?;
    let snapshot: String = row.try_get("snapshot")?;
    Ok(Version {
        workflow_id: WorkflowId(parse_uuid(&workflow_id)?),
        version_number: number(row.try_get("version_number")?)?,
        snapshot: serde_json::from_str(&snapshot)?,
        author_id: UserId(row.try_get("author_id")?),
        change_summary: row.try_get("change_summary")?,
        created_at: row.try_get("created_at")?,
    })
}

fn review_from_row(row: &SqliteRow) -> EngineResult<Review> {
    let id: String = row.try_get("id")?;
    let workflow_id: String = row.try_get("workflow_id")?;
    let status: String = row.try_get("status")?;
    let recommendation: Option<String> = row.try_get("recommendation")?;
    Ok(Review {
        id: ReviewId(parse_uuid(&id)?),
        workflow_id: WorkflowId(parse_uuid(&workflow_id)?),
        reviewer_id: UserId(row.try_get("reviewer_id")?),
        version_number: number(row.try_get("version_number")?)?,
        status: status.parse()?,
        recommendation: recommendation.map(|r| r.parse()).transpose()?,
        comment: row.try_get("comment")?,
        requested_at: row.try_get("requested_at")?,
        responded_at: row.try_get("responded_at")?,
    })
}

fn comment_from_row(row: &SqliteRow) -> EngineResult<AxisComment> {
    let id: String = row.try_get("id")?;
    let workflow_id: String = row.try_get("workflow_id")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    Ok(AxisComment {
        id: CommentId(parse_uuid(&id)?),
        workflow_id: WorkflowId(parse_uuid(&workflow_id)?),
        axis_id: AxisId(row.try_get("axis_id")?),
        parent_id: parent_id.map(|p| parse_uuid(&p).map(CommentId)).transpose()?,
        author_id: UserId(row.try_get("author_id")?),
        body: row.try_get("body")?,
        resolved: row.try_get("resolved")?,
        created_at: row.try_get("created_at")?,
    })
}

fn event_from_row(row: &SqliteRow) -> EngineResult<ActivityEvent> {
    let workflow_id: String = row.try_get("workflow_id")?;
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    let state: String = row.try_get("state")?;
    Ok(ActivityEvent {
        cursor: Cursor(row.try_get("seq")?),
        workflow_id: WorkflowId(parse_uuid(&workflow_id)?),
        kind: kind.parse()?,
        actor_id: UserId(row.try_get("actor_id")?),
        payload: serde_json::from_str(&payload)?,
        state: state.parse()?,
        version: number(row.try_get("version")?)?,
        created_at: row.try_get("created_at")?,
    })
}

async fn fetch_workflow(tx: &mut Transaction<'_, Sqlite>, id: WorkflowId) -> EngineResult<Option<AssessmentWorkflow>> {
    let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(workflow_from_row).transpose()
}

async fn append_activity(
    tx: &mut Transaction<'_, Sqlite>,
    workflow: &AssessmentWorkflow,
    activity: NewActivity,
    at: DateTime<Utc>,
) -> EngineResult<ActivityEvent> {
    let result = sqlx::query(
        r#"
        INSERT INTO activity (workflow_id, kind, actor_id, payload, state, version, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(workflow.id.to_string())
    .bind(activity.kind.as_str())
    .bind(activity.actor_id.as_str())
    .bind(serde_json::to_string(&activity.payload)?)
    .bind(workflow.state.as_str())
    .bind(i64::from(workflow.current_version))
    .bind(at)
    .execute(&mut **tx)
    .await?;

    Ok(ActivityEvent {
        cursor: Cursor(result.last_insert_rowid()),
        workflow_id: workflow.id,
        kind: activity.kind,
        actor_id: activity.actor_id,
        payload: activity.payload,
        state: workflow.state,
        version: workflow.current_version,
        created_at: at,
    })
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn create_workflow(
        &self,
        workflow: &AssessmentWorkflow,
        first_version: &Version,
        activity: NewActivity,
    ) -> EngineResult<Option<ActivityEvent>> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflows (id, assessment_id, author_id, state, current_version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(assessment_id) DO NOTHING
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.assessment_id)
        .bind(workflow.author_id.as_str())
        .bind(workflow.state.as_str())
        .bind(i64::from(workflow.current_version))
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO versions (workflow_id, version_number, snapshot, author_id, change_summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(i64::from(first_version.version_number))
        .bind(serde_json::to_string(&first_version.snapshot)?)
        .bind(first_version.author_id.as_str())
        .bind(&first_version.change_summary)
        .bind(first_version.created_at)
        .execute(&mut *tx)
        .await?;

        let event = append_activity(&mut tx, workflow, activity, workflow.created_at).await?;
        tx.commit().await?;
        Ok(Some(event))
    }

    async fn get_workflow(&self, id: WorkflowId) -> EngineResult<Option<AssessmentWorkflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn find_by_assessment(&self, assessment_id: &str) -> EngineResult<Option<AssessmentWorkflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE assessment_id = ?")
            .bind(assessment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn commit(&self, write: WorkflowWrite) -> EngineResult<CommitOutcome> {
        let id = write.workflow_id.to_string();
        let next_version = write.claimed_version().unwrap_or(write.expected_version);
        let archived_at = write.archive.then_some(write.at);

        let mut tx = self.pool.begin().await?;

        // Compare-and-set; also takes the write lock for the rest of the transaction
        let claimed = sqlx::query(
            r#"
            UPDATE workflows
            SET current_version = ?, updated_at = ?, archived_at = COALESCE(?, archived_at)
            WHERE id = ? AND state = ? AND current_version = ? AND archived_at IS NULL
            "#,
        )
        .bind(i64::from(next_version))
        .bind(write.at)
        .bind(archived_at)
        .bind(&id)
        .bind(write.expected_state.as_str())
        .bind(i64::from(write.expected_version))
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return match fetch_workflow(&mut tx, write.workflow_id).await? {
                Some(_) => Err(write.conflict()),
                None => Err(EngineError::not_found(Entity::Workflow, write.workflow_id)),
            };
        }

        let review = match &write.review_response {
            Some(response) => {
                let pending = sqlx::query(
                    "SELECT id FROM reviews WHERE workflow_id = ? AND reviewer_id = ? AND status = ? LIMIT 1",
                )
                .bind(&id)
                .bind(response.reviewer_id.as_str())
                .bind(ReviewStatus::Pending.as_str())
                .fetch_optional(&mut *tx)
                .await?;
                let Some(pending) = pending else {
                    return Err(write.conflict());
                };
                let review_id: String = pending.try_get("id")?;

                sqlx::query(
                    r#"
                    UPDATE reviews SET status = ?, recommendation = ?, comment = ?, responded_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(ReviewStatus::Submitted.as_str())
                .bind(response.recommendation.as_str())
                .bind(&response.comment)
                .bind(write.at)
                .bind(&review_id)
                .execute(&mut *tx)
                .await?;

                let row = sqlx::query("SELECT * FROM reviews WHERE id = ?")
                    .bind(&review_id)
                    .fetch_one(&mut *tx)
                    .await?;
                Some(review_from_row(&row)?)
            }
            None => None,
        };

        for review in &write.new_reviews {
            let inserted = sqlx::query(
                r#"
                INSERT INTO reviews (id, workflow_id, reviewer_id, version_number, status, requested_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(review.id.to_string())
            .bind(&id)
            .bind(review.reviewer_id.as_str())
            .bind(i64::from(review.version_number))
            .bind(review.status.as_str())
            .bind(review.requested_at)
            .execute(&mut *tx)
            .await;
            match inserted {
                Ok(_) => {}
                // Another writer opened a review for this reviewer since the caller read
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => return Err(write.conflict()),
                Err(e) => return Err(e.into()),
            }
        }

        let pending: i64 = sqlx::query("SELECT COUNT(*) AS pending FROM reviews WHERE workflow_id = ? AND status = ?")
            .bind(&id)
            .bind(ReviewStatus::Pending.as_str())
            .fetch_one(&mut *tx)
            .await?
            .try_get("pending")?;
        let pending_reviews = usize::try_from(pending).unwrap_or_default();

        let state = write.change.resolve(write.expected_state, pending_reviews);
        if state != write.expected_state {
            sqlx::query("UPDATE workflows SET state = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }

        let version = match write.version {
            Some(new) => {
                let version = Version {
                    workflow_id: write.workflow_id,
                    version_number: next_version,
                    snapshot: new.snapshot,
                    author_id: new.author_id,
                    change_summary: new.change_summary,
                    created_at: write.at,
                };
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO versions (workflow_id, version_number, snapshot, author_id, change_summary, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(i64::from(version.version_number))
                .bind(serde_json::to_string(&version.snapshot)?)
                .bind(version.author_id.as_str())
                .bind(&version.change_summary)
                .bind(version.created_at)
                .execute(&mut *tx)
                .await;
                match inserted {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                        return Err(EngineError::ConcurrentVersionConflict {
                            workflow_id: write.workflow_id,
                            attempted: next_version,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
                Some(version)
            }
            None => None,
        };

        let workflow = fetch_workflow(&mut tx, write.workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Workflow, write.workflow_id))?;
        let event = append_activity(&mut tx, &workflow, write.activity, write.at).await?;
        tx.commit().await?;

        Ok(CommitOutcome {
            workflow,
            version,
            review,
            pending_reviews,
            event,
        })
    }

    async fn get_version(&self, id: WorkflowId, number: u32) -> EngineResult<Option<Version>> {
        let row = sqlx::query("SELECT * FROM versions WHERE workflow_id = ? AND version_number = ?")
            .bind(id.to_string())
            .bind(i64::from(number))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn list_versions(&self, id: WorkflowId) -> EngineResult<Vec<Version>> {
        let rows = sqlx::query("SELECT * FROM versions WHERE workflow_id = ? ORDER BY version_number")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(version_from_row).collect()
    }

    async fn list_reviews(&self, id: WorkflowId) -> EngineResult<Vec<Review>> {
        let rows = sqlx::query("SELECT * FROM reviews WHERE workflow_id = ? ORDER BY requested_at, rowid")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(review_from_row).collect()
    }

    async fn insert_comment(&self, comment: &AxisComment, activity: NewActivity) -> EngineResult<ActivityEvent> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO comments (id, workflow_id, axis_id, parent_id, author_id, body, resolved, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(comment.id.to_string())
        .bind(comment.workflow_id.to_string())
        .bind(&comment.axis_id.0)
        .bind(comment.parent_id.map(|p| p.to_string()))
        .bind(comment.author_id.as_str())
        .bind(&comment.body)
        .bind(comment.resolved)
        .bind(comment.created_at)
        .execute(&mut *tx)
        .await?;

        let workflow = fetch_workflow(&mut tx, comment.workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Workflow, comment.workflow_id))?;
        let event = append_activity(&mut tx, &workflow, activity, comment.created_at).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn get_comment(&self, id: CommentId) -> EngineResult<Option<AxisComment>> {
        let row = sqlx::query("SELECT * FROM comments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(comment_from_row).transpose()
    }

    async fn list_comments(&self, id: WorkflowId, axis: Option<&AxisId>) -> EngineResult<Vec<AxisComment>> {
        let rows = match axis {
            Some(axis) => {
                sqlx::query("SELECT * FROM comments WHERE workflow_id = ? AND axis_id = ? ORDER BY created_at, rowid")
                    .bind(id.to_string())
                    .bind(&axis.0)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM comments WHERE workflow_id = ? ORDER BY created_at, rowid")
                    .bind(id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(comment_from_row).collect()
    }

    async fn resolve_comments(
        &self,
        id: WorkflowId,
        comment_ids: &[CommentId],
        activity: NewActivity,
    ) -> EngineResult<ActivityEvent> {
        let mut tx = self.pool.begin().await?;

        for comment_id in comment_ids {
            sqlx::query("UPDATE comments SET resolved = TRUE WHERE id = ? AND workflow_id = ?")
                .bind(comment_id.to_string())
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        let workflow = fetch_workflow(&mut tx, id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Workflow, id))?;
        let event = append_activity(&mut tx, &workflow, activity, Utc::now()).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn list_activity(&self, id: WorkflowId, after: Cursor, limit: usize) -> EngineResult<Vec<ActivityEvent>> {
        let rows = sqlx::query("SELECT * FROM activity WHERE workflow_id = ? AND seq > ? ORDER BY seq LIMIT ?")
            .bind(id.to_string())
            .bind(after.0)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn latest_activity(&self, id: WorkflowId) -> EngineResult<Option<ActivityEvent>> {
        let row = sqlx::query("SELECT * FROM activity WHERE workflow_id = ? ORDER BY seq DESC LIMIT 1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewVersion, ReviewResponse};
    use crate::workflow::machine::StateChange;
    use crate::workflow::reviews::ReviewLedger;
    use crate::workflow::types::{ActivityKind, Recommendation, Snapshot, WorkflowState};
    use serde_json::json;

    async fn seeded() -> (SqliteStore, AssessmentWorkflow) {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let workflow = AssessmentWorkflow {
            id: WorkflowId::new(),
            assessment_id: "a1".to_string(),
            author_id: UserId::from("author1"),
            state: WorkflowState::Draft,
            current_version: 1,
            created_at: now,
            updated_at: now,
            archived_at: None,
        };
        let mut snapshot = Snapshot::default();
        snapshot.answers.insert(AxisId::from("strategy"), json!({"q1": 4}));
        let version = Version {
            workflow_id: workflow.id,
            version_number: 1,
            snapshot,
            author_id: workflow.author_id.clone(),
            change_summary: Some("initial draft".to_string()),
            created_at: now,
        };
        let activity = NewActivity::new(ActivityKind::Initialized, &workflow.author_id, json!({}));
        store.create_workflow(&workflow, &version, activity).await.unwrap().unwrap();
        (store, workflow)
    }

    fn note(kind: ActivityKind) -> NewActivity {
        NewActivity::new(kind, &UserId::from("author1"), json!({"k": 1}))
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let (store, wf) = seeded().await;
        store.init_schema().await.unwrap();
        let stored = store.find_by_assessment("a1").await.unwrap().unwrap();
        assert_eq!(stored.id, wf.id);
        assert_eq!(stored.state, WorkflowState::Draft);
        assert_eq!(store.list_versions(wf.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_json_column() {
        let (store, wf) = seeded().await;
        let version = store.get_version(wf.id, 1).await.unwrap().unwrap();
        assert_eq!(version.snapshot.answers[&AxisId::from("strategy")]["q1"], 4);
        assert_eq!(version.change_summary.as_deref(), Some("initial draft"));
    }

    #[tokio::test]
    async fn stale_write_is_a_version_conflict() {
        let (store, wf) = seeded().await;
        let write = WorkflowWrite::against(&wf, StateChange::Stay, note(ActivityKind::DraftSaved)).with_version(
            NewVersion {
                snapshot: Snapshot::default(),
                author_id: UserId::from("author1"),
                change_summary: None,
            },
        );

        let outcome = store.commit(write.clone()).await.unwrap();
        assert_eq!(outcome.workflow.current_version, 2);
        assert_eq!(outcome.event.version, 2);

        let err = store.commit(write).await.unwrap_err();
        assert!(matches!(err, EngineError::ConcurrentVersionConflict { attempted: 2, .. }));
        assert_eq!(store.list_activity(wf.id, Cursor::START, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn review_round_settles_inside_the_transaction() {
        let (store, wf) = seeded().await;
        let reviews: Vec<Review> = ["r1", "r2"]
            .into_iter()
            .map(|r| Review {
                id: ReviewId::new(),
                workflow_id: wf.id,
                reviewer_id: UserId::from(r),
                version_number: 2,
                status: ReviewStatus::Pending,
                recommendation: None,
                comment: None,
                requested_at: Utc::now(),
                responded_at: None,
            })
            .collect();
        let submitted = store
            .commit(
                WorkflowWrite::against(
                    &wf,
                    StateChange::To(WorkflowState::InReview),
                    note(ActivityKind::SubmittedForReview),
                )
                .with_version(NewVersion {
                    snapshot: Snapshot::default(),
                    author_id: UserId::from("author1"),
                    change_summary: Some("submitted for review".to_string()),
                })
                .with_reviews(reviews),
            )
            .await
            .unwrap();
        assert_eq!(submitted.workflow.state, WorkflowState::InReview);
        assert_eq!(submitted.pending_reviews, 2);

        let mut current = submitted.workflow;
        for (reviewer, expected) in [("r1", WorkflowState::InReview), ("r2", WorkflowState::AwaitingApproval)] {
            let outcome = store
                .commit(
                    WorkflowWrite::against(
                        &current,
                        StateChange::WhenReviewsSettled(WorkflowState::AwaitingApproval),
                        note(ActivityKind::ReviewSubmitted),
                    )
                    .with_review_response(ReviewResponse {
                        reviewer_id: UserId::from(reviewer),
                        recommendation: Recommendation::Reject,
                        comment: Some("missing data".to_string()),
                    }),
                )
                .await
                .unwrap();
            assert_eq!(outcome.workflow.state, expected);
            assert_eq!(outcome.review.unwrap().recommendation, Some(Recommendation::Reject));
            current = outcome.workflow;
        }

        let stored = store.list_reviews(wf.id).await.unwrap();
        assert!(stored.iter().all(|r| r.status == ReviewStatus::Submitted));
        let latest = store.latest_activity(wf.id).await.unwrap().unwrap();
        assert_eq!(latest.state, WorkflowState::AwaitingApproval);
        assert_eq!(latest.payload, json!({"k": 1}));
    }

    #[tokio::test]
    async fn comments_filter_by_axis_and_resolve() {
        let (store, wf) = seeded().await;
        let root = AxisComment {
            id: CommentId::new(),
            workflow_id: wf.id,
            axis_id: AxisId::from("strategy"),
            parent_id: None,
            author_id: UserId::from("r1"),
            body: "why 4?".to_string(),
            resolved: false,
            created_at: Utc::now(),
        };
        let reply = AxisComment {
            id: CommentId::new(),
            parent_id: Some(root.id),
            body: "see appendix".to_string(),
            ..root.clone()
        };
        store.insert_comment(&root, note(ActivityKind::CommentAdded)).await.unwrap();
        store.insert_comment(&reply, note(ActivityKind::CommentAdded)).await.unwrap();

        let thread = store.list_comments(wf.id, Some(&AxisId::from("strategy"))).await.unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1].parent_id, Some(root.id));
        assert!(store.list_comments(wf.id, Some(&AxisId::from("people"))).await.unwrap().is_empty());

        store
            .resolve_comments(wf.id, &[root.id, reply.id], note(ActivityKind::CommentResolved))
            .await
            .unwrap();
        assert!(store.get_comment(reply.id).await.unwrap().unwrap().resolved);
    }

    #[tokio::test]
    async fn stale_review_request_hits_the_open_review_index() {
        let (store, wf) = seeded().await;
        let in_review = store
            .commit(WorkflowWrite::against(
                &wf,
                StateChange::To(WorkflowState::InReview),
                note(ActivityKind::SubmittedForReview),
            ))
            .await
            .unwrap()
            .workflow;

        let request = || {
            let write = WorkflowWrite::against(&in_review, StateChange::Stay, note(ActivityKind::ReviewsRequested));
            let reviews = ReviewLedger::plan_requests(&in_review, &[], &[UserId::from("r3")], 1, write.at);
            write.with_reviews(reviews)
        };

        store.commit(request()).await.unwrap();
        let err = store.commit(request()).await.unwrap_err();
        assert!(err.is_retryable());

        let reviews = store.list_reviews(wf.id).await.unwrap();
        assert_eq!(reviews.iter().filter(|r| r.is_pending()).count(), 1);
        assert_eq!(store.list_activity(wf.id, Cursor::START, 10).await.unwrap().len(), 3);
    }
}

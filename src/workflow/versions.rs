/// Version history and restore
///
/// Versions are append-only. A new version always takes the number right after
/// the one the writer read; losing that race surfaces as
/// `ConcurrentVersionConflict`. Restoring copies an old snapshot forward into a
/// new version and never rewinds history.

use crate::access::Actor;
use crate::error::{Entity, EngineError, EngineResult};
use crate::storage::{CommitOutcome, NewActivity, NewVersion, WorkflowStore, WorkflowWrite};
use crate::workflow::machine::{plan, StateChange};
use crate::workflow::types::{ActivityKind, AssessmentWorkflow, Operation, Snapshot, Version, WorkflowId};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct VersionStore {
    store: Arc<dyn WorkflowStore>,
}

impl VersionStore {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Append the next version to a workflow as read by the caller
    pub async fn create_version(
        &self,
        workflow: &AssessmentWorkflow,
        change: StateChange,
        version: NewVersion,
        activity: NewActivity,
    ) -> EngineResult<CommitOutcome> {
        let write = WorkflowWrite::against(workflow, change, activity).with_version(version);
        let claimed = write.attempted_version();

        match self.store.commit(write).await {
            Ok(outcome) => {
                tracing::info!("📸 Workflow {} now at v{}", workflow.id, claimed);
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not append v{} to workflow {}: {}", claimed, workflow.id, e);
                Err(e)
            }
        }
    }

    /// Copy version `number` forward as a new version (DRAFT only)
    pub async fn restore_version(
        &self,
        actor: &Actor,
        workflow: &AssessmentWorkflow,
        number: u32,
    ) -> EngineResult<CommitOutcome> {
        let change = plan(workflow.state, Operation::RestoreVersion)?;
        let source = self.get_version(workflow.id, number).await?;

        let next = workflow.current_version + 1;
        let activity = NewActivity::new(
            ActivityKind::VersionRestored,
            &actor.user_id,
            json!({ "restored_from": number, "version": next }),
        );
        let version = NewVersion {
            snapshot: source.snapshot,
            author_id: actor.user_id.clone(),
            change_summary: Some(format!("restored from v{}", number)),
        };

        tracing::info!("⏪ Restoring workflow {} from v{} as v{}", workflow.id, number, next);
        self.create_version(workflow, change, version, activity).await
    }

    pub async fn get_version(&self, id: WorkflowId, number: u32) -> EngineResult<Version> {
        self.store
            .get_version(id, number)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Version, format!("{}/v{}", id, number)))
    }

    pub async fn list_versions(&self, id: WorkflowId) -> EngineResult<Vec<Version>> {
        self.store.list_versions(id).await
    }

    /// Content of the workflow's latest version
    pub async fn current_snapshot(&self, workflow: &AssessmentWorkflow) -> EngineResult<Snapshot> {
        Ok(self.get_version(workflow.id, workflow.current_version).await?.snapshot)
    }
}

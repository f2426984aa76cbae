/// Axis comment threads
///
/// Threads are at most three levels deep (root, reply, reply to reply). Depth is
/// checked once at write time by walking the parent chain; existing threads are
/// never re-validated.

use crate::access::Actor;
use crate::error::{Entity, EngineError, EngineResult};
use crate::storage::{NewActivity, WorkflowStore};
use crate::workflow::types::{ActivityEvent, ActivityKind, AxisComment, AxisId, CommentId, WorkflowId};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

pub const MAX_THREAD_DEPTH: usize = 3;

/// A stored comment and the activity it produced
#[derive(Debug, Clone)]
pub struct CommentPosted {
    pub comment: AxisComment,
    pub event: ActivityEvent,
}

/// What `resolve_comment` changed
#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub workflow_id: WorkflowId,
    pub comment_id: CommentId,
    /// Comments flipped to resolved by this call (empty if all already were)
    pub resolved: Vec<CommentId>,
    /// Replies left unresolved under the comment (only without cascade)
    pub unresolved_descendants: usize,
    #[serde(skip)]
    pub event: Option<ActivityEvent>,
}

impl ResolveOutcome {
    /// The caller resolved a thread that still has open replies
    pub fn has_warning(&self) -> bool {
        self.unresolved_descendants > 0
    }
}

#[derive(Clone)]
pub struct CommentThreadStore {
    store: Arc<dyn WorkflowStore>,
}

impl CommentThreadStore {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn add_comment(
        &self,
        actor: &Actor,
        workflow_id: WorkflowId,
        axis_id: AxisId,
        parent_id: Option<CommentId>,
        body: &str,
    ) -> EngineResult<CommentPosted> {
        let body = body.trim();
        if body.is_empty() {
            return Err(EngineError::validation("comment body must not be empty"));
        }
        if axis_id.0.trim().is_empty() {
            return Err(EngineError::validation("axis id must not be empty"));
        }

        if let Some(parent_id) = parent_id {
            let parent = self.get_comment(parent_id).await?;
            if parent.workflow_id != workflow_id || parent.axis_id != axis_id {
                return Err(EngineError::validation(format!(
                    "parent comment {} belongs to another thread",
                    parent_id
                )));
            }
            let depth = self.depth_of(&parent).await? + 1;
            if depth > MAX_THREAD_DEPTH {
                tracing::warn!("🧵 Reply to {} would nest {} levels deep", parent_id, depth);
                return Err(EngineError::ThreadTooDeep {
                    max_depth: MAX_THREAD_DEPTH,
                });
            }
        }

        let comment = AxisComment {
            id: CommentId::new(),
            workflow_id,
            axis_id,
            parent_id,
            author_id: actor.user_id.clone(),
            body: body.to_string(),
            resolved: false,
            created_at: Utc::now(),
        };
        let activity = NewActivity::new(
            ActivityKind::CommentAdded,
            &actor.user_id,
            json!({
                "comment_id": comment.id,
                "axis_id": comment.axis_id,
                "parent_id": comment.parent_id,
            }),
        );

        let event = self.store.insert_comment(&comment, activity).await?;
        tracing::info!("💬 Comment {} added on {} of workflow {}", comment.id, comment.axis_id, workflow_id);
        Ok(CommentPosted { comment, event })
    }

    /// Mark a comment resolved, optionally together with every reply under it
    ///
    /// Without `cascade`, open replies are reported through
    /// `ResolveOutcome::has_warning` instead of failing the call.
    pub async fn resolve_comment(
        &self,
        actor: &Actor,
        comment_id: CommentId,
        cascade: bool,
    ) -> EngineResult<ResolveOutcome> {
        let comment = self.get_comment(comment_id).await?;
        let thread = self
            .store
            .list_comments(comment.workflow_id, Some(&comment.axis_id))
            .await?;
        let descendants = descendants_of(&thread, comment_id);

        let mut resolved = Vec::new();
        if !comment.resolved {
            resolved.push(comment_id);
        }
        let open: Vec<CommentId> = descendants.iter().filter(|c| !c.resolved).map(|c| c.id).collect();
        let unresolved_descendants = if cascade {
            resolved.extend(open);
            0
        } else {
            open.len()
        };

        let event = if resolved.is_empty() {
            tracing::debug!("💬 Comment {} already resolved", comment_id);
            None
        } else {
            let activity = NewActivity::new(
                ActivityKind::CommentResolved,
                &actor.user_id,
                json!({ "comment_id": comment_id, "resolved": resolved, "cascade": cascade }),
            );
            let event = self
                .store
                .resolve_comments(comment.workflow_id, &resolved, activity)
                .await?;
            tracing::info!("☑️ Resolved {} comment(s) under {}", resolved.len(), comment_id);
            Some(event)
        };

        Ok(ResolveOutcome {
            workflow_id: comment.workflow_id,
            comment_id,
            resolved,
            unresolved_descendants,
            event,
        })
    }

    pub async fn get_comment(&self, id: CommentId) -> EngineResult<AxisComment> {
        self.store
            .get_comment(id)
            .await?
            .ok_or_else(|| EngineError::not_found(Entity::Comment, id))
    }

    pub async fn list_comments(&self, id: WorkflowId, axis: Option<&AxisId>) -> EngineResult<Vec<AxisComment>> {
        self.store.list_comments(id, axis).await
    }

    /// 1 for a root comment, 2 for a reply, ...
    async fn depth_of(&self, comment: &AxisComment) -> EngineResult<usize> {
        let mut depth = 1;
        let mut next = comment.parent_id;
        while let Some(id) = next {
            depth += 1;
            if depth > MAX_THREAD_DEPTH {
                break;
            }
            next = self.get_comment(id).await?.parent_id;
        }
        Ok(depth)
    }
}

/// Every comment below `root` in the thread, breadth first
fn descendants_of(thread: &[AxisComment], root: CommentId) -> Vec<&AxisComment> {
    let mut children: HashMap<CommentId, Vec<&AxisComment>> = HashMap::new();
    for comment in thread {
        if let Some(parent) = comment.parent_id {
            children.entry(parent).or_default().push(comment);
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        for child in children.get(&id).into_iter().flatten() {
            found.push(*child);
            queue.push_back(child.id);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    async fn setup() -> (CommentThreadStore, WorkflowId) {
        let store = Arc::new(InMemoryStore::new());
        let workflow = store.seed_workflow("a1", "author1").await;
        (CommentThreadStore::new(store), workflow.id)
    }

    fn actor() -> Actor {
        Actor::new("r1", "reviewer")
    }

    #[tokio::test]
    async fn third_level_reply_is_allowed_fourth_is_not() {
        let (threads, wf) = setup().await;
        let axis = AxisId::from("strategy");

        let root = threads.add_comment(&actor(), wf, axis.clone(), None, "root").await.unwrap();
        let reply = threads
            .add_comment(&actor(), wf, axis.clone(), Some(root.comment.id), "reply")
            .await
            .unwrap();
        let third = threads
            .add_comment(&actor(), wf, axis.clone(), Some(reply.comment.id), "reply to reply")
            .await
            .unwrap();

        let err = threads
            .add_comment(&actor(), wf, axis, Some(third.comment.id), "too deep")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ThreadTooDeep { max_depth: 3 }));
    }

    #[tokio::test]
    async fn reply_must_stay_on_the_parent_axis() {
        let (threads, wf) = setup().await;
        let root = threads
            .add_comment(&actor(), wf, AxisId::from("strategy"), None, "root")
            .await
            .unwrap();
        let err = threads
            .add_comment(&actor(), wf, AxisId::from("people"), Some(root.comment.id), "elsewhere")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn resolve_without_cascade_warns_about_open_replies() {
        let (threads, wf) = setup().await;
        let axis = AxisId::from("data");
        let root = threads.add_comment(&actor(), wf, axis.clone(), None, "root").await.unwrap();
        let reply = threads
            .add_comment(&actor(), wf, axis.clone(), Some(root.comment.id), "reply")
            .await
            .unwrap();
        threads
            .add_comment(&actor(), wf, axis.clone(), Some(reply.comment.id), "nested")
            .await
            .unwrap();

        let outcome = threads.resolve_comment(&actor(), root.comment.id, false).await.unwrap();
        assert_eq!(outcome.resolved, vec![root.comment.id]);
        assert_eq!(outcome.unresolved_descendants, 2);
        assert!(outcome.has_warning());

        let outcome = threads.resolve_comment(&actor(), root.comment.id, true).await.unwrap();
        assert_eq!(outcome.resolved.len(), 2);
        assert!(!outcome.has_warning());

        let remaining = threads.list_comments(wf, Some(&axis)).await.unwrap();
        assert!(remaining.iter().all(|c| c.resolved));
    }

    #[tokio::test]
    async fn resolving_twice_writes_nothing() {
        let (threads, wf) = setup().await;
        let root = threads
            .add_comment(&actor(), wf, AxisId::from("tech"), None, "root")
            .await
            .unwrap();
        assert!(threads.resolve_comment(&actor(), root.comment.id, false).await.unwrap().event.is_some());
        let again = threads.resolve_comment(&actor(), root.comment.id, true).await.unwrap();
        assert!(again.resolved.is_empty());
        assert!(again.event.is_none());
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let (threads, wf) = setup().await;
        let err = threads
            .add_comment(&actor(), wf, AxisId::from("tech"), None, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }
}

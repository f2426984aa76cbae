/// Who is looking at a workflow right now
///
/// Presence is volatile and best effort: entries are kept in memory only, a
/// missed heartbeat simply ages an entry out, and nothing here ever fails.

use crate::access::UserId;
use crate::workflow::types::WorkflowId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceEntry {
    pub workflow_id: WorkflowId,
    pub user_id: UserId,
    pub last_heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    /// Monotonic time used for the liveness check
    seen: Instant,
    /// Wall clock time reported to callers
    at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PresenceTracker {
    entries: DashMap<WorkflowId, HashMap<UserId, Heartbeat>>,
    liveness: Duration,
}

impl PresenceTracker {
    pub fn new(liveness: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            liveness,
        }
    }

    pub fn liveness(&self) -> Duration {
        self.liveness
    }

    /// Upsert the caller's last heartbeat
    pub fn heartbeat(&self, workflow_id: WorkflowId, user_id: &UserId) -> PresenceEntry {
        let beat = Heartbeat {
            seen: Instant::now(),
            at: Utc::now(),
        };
        self.entries
            .entry(workflow_id)
            .or_default()
            .insert(user_id.clone(), beat);

        tracing::debug!("👀 {} active on workflow {}", user_id, workflow_id);
        PresenceEntry {
            workflow_id,
            user_id: user_id.clone(),
            last_heartbeat_at: beat.at,
        }
    }

    /// Entries whose last heartbeat is within the liveness window, ordered by user
    pub fn list_active(&self, workflow_id: WorkflowId) -> Vec<PresenceEntry> {
        let Some(users) = self.entries.get(&workflow_id) else {
            return Vec::new();
        };

        let now = Instant::now();
        let mut active: Vec<PresenceEntry> = users
            .iter()
            .filter(|(_, beat)| self.is_live(beat, now))
            .map(|(user_id, beat)| PresenceEntry {
                workflow_id,
                user_id: user_id.clone(),
                last_heartbeat_at: beat.at,
            })
            .collect();
        active.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        active
    }

    /// Drop the caller's entry; returns whether one existed
    pub fn leave(&self, workflow_id: WorkflowId, user_id: &UserId) -> bool {
        let removed = self
            .entries
            .get_mut(&workflow_id)
            .is_some_and(|mut users| users.remove(user_id).is_some());
        self.entries.remove_if(&workflow_id, |_, users| users.is_empty());
        removed
    }

    /// Remove every entry outside the liveness window; returns how many went
    pub fn evict_stale(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        for mut users in self.entries.iter_mut() {
            let before = users.len();
            users.retain(|_, beat| self.is_live(beat, now));
            evicted += before - users.len();
        }
        self.entries.retain(|_, users| !users.is_empty());
        evicted
    }

    fn is_live(&self, beat: &Heartbeat, now: Instant) -> bool {
        now.saturating_duration_since(beat.seen) <= self.liveness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_expires_after_liveness_window() {
        let tracker = PresenceTracker::new(Duration::from_secs(30));
        let wf = WorkflowId::new();
        tracker.heartbeat(wf, &UserId::from("u1"));
        tracker.heartbeat(wf, &UserId::from("u2"));

        tokio::time::advance(Duration::from_secs(20)).await;
        tracker.heartbeat(wf, &UserId::from("u2"));
        assert_eq!(tracker.list_active(wf).len(), 2);

        tokio::time::advance(Duration::from_secs(15)).await;
        let active = tracker.list_active(wf);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, UserId::from("u2"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_stale_entries() {
        let tracker = PresenceTracker::new(Duration::from_secs(10));
        let a = WorkflowId::new();
        let b = WorkflowId::new();
        tracker.heartbeat(a, &UserId::from("u1"));
        tokio::time::advance(Duration::from_secs(11)).await;
        tracker.heartbeat(b, &UserId::from("u2"));

        assert_eq!(tracker.evict_stale(), 1);
        assert!(tracker.list_active(a).is_empty());
        assert_eq!(tracker.list_active(b).len(), 1);
    }

    #[test]
    fn leave_removes_the_entry() {
        let tracker = PresenceTracker::new(Duration::from_secs(30));
        let wf = WorkflowId::new();
        tracker.heartbeat(wf, &UserId::from("u1"));
        assert!(tracker.leave(wf, &UserId::from("u1")));
        assert!(!tracker.leave(wf, &UserId::from("u1")));
        assert!(tracker.list_active(wf).is_empty());
    }
}

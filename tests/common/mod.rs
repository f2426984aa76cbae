#![allow(dead_code)]

use assessway::{
    access::{Actor, UserId},
    facade::WorkflowFacade,
    storage::{InMemoryStore, WorkflowStore},
    workflow::{AxisId, Snapshot},
};
use serde_json::json;
use std::sync::Arc;

pub fn author() -> Actor {
    Actor::new("author1", "consultant")
}

pub fn reviewer(id: &str) -> Actor {
    Actor::new(id, "reviewer")
}

pub fn approver() -> Actor {
    Actor::new("approver1", "approver")
}

pub fn admin() -> Actor {
    Actor::new("admin1", "admin")
}

pub fn users(ids: &[&str]) -> Vec<UserId> {
    ids.iter().map(|id| UserId::from(*id)).collect()
}

/// A snapshot with every listed axis answered
pub fn answered(axes: &[(&str, i64)]) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for (axis, level) in axes {
        snapshot.answers.insert(AxisId::from(*axis), json!({ "level": level }));
        snapshot.axis_scores.insert(AxisId::from(*axis), *level as f64);
    }
    snapshot
}

pub fn facade_over(store: Arc<dyn WorkflowStore>) -> Arc<WorkflowFacade> {
    Arc::new(WorkflowFacade::builder(store).build())
}

pub fn memory_facade() -> Arc<WorkflowFacade> {
    facade_over(Arc::new(InMemoryStore::new()))
}

mod common;

use assessway::{
    access::Actor,
    error::EngineError,
    workflow::{ActivityKind, AxisId, Cursor, Recommendation, ReviewStatus, WorkflowState},
};
use common::*;
use std::time::Duration;

#[tokio::test]
async fn review_round_reject_and_resume() {
    let facade = memory_facade();
    let w1 = facade
        .initialize(&author(), "assessment-W1", answered(&[("strategy", 2), ("technology", 3)]))
        .await
        .unwrap();
    assert_eq!(w1.state, WorkflowState::Draft);
    assert_eq!(w1.current_version, 1);
    let id = w1.workflow_id;

    let submitted = facade
        .submit_for_review(&author(), id, users(&["r1", "r2"]), None)
        .await
        .unwrap();
    assert_eq!(submitted.state, WorkflowState::InReview);
    let reviews = facade.list_reviews(&author(), id).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert!(reviews.iter().all(|r| r.status == ReviewStatus::Pending));

    let first = facade
        .submit_review(&reviewer("r1"), id, Recommendation::Approve, None)
        .await
        .unwrap();
    assert_eq!(first.summary.state, WorkflowState::InReview);
    assert!(!first.was_last);

    let second = facade
        .submit_review(&reviewer("r2"), id, Recommendation::Reject, Some("missing data".to_string()))
        .await
        .unwrap();
    assert_eq!(second.summary.state, WorkflowState::AwaitingApproval);
    assert!(second.was_last);
    assert_eq!(second.review.unwrap().comment.as_deref(), Some("missing data"));

    let rejected = facade.reject(&approver(), id, "incomplete").await.unwrap();
    assert_eq!(rejected.state, WorkflowState::Rejected);
    let version_before_resume = rejected.current_version;

    let resumed = facade.resume(&author(), id).await.unwrap();
    assert_eq!(resumed.state, WorkflowState::Draft);
    assert_eq!(resumed.current_version, version_before_resume);

    let kinds: Vec<ActivityKind> = facade
        .list_activity(&author(), id, Cursor::START, None)
        .await
        .unwrap()
        .events
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::Initialized,
            ActivityKind::SubmittedForReview,
            ActivityKind::ReviewSubmitted,
            ActivityKind::ReviewSubmitted,
            ActivityKind::Rejected,
            ActivityKind::Resumed,
        ]
    );
}

#[tokio::test]
async fn resubmission_after_resume_opens_a_fresh_round() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-resubmit", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;

    facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap();
    facade.submit_review(&reviewer("r1"), id, Recommendation::Reject, None).await.unwrap();
    facade.reject(&approver(), id, "needs evidence").await.unwrap();
    facade.resume(&author(), id).await.unwrap();
    let again = facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap();
    assert_eq!(again.state, WorkflowState::InReview);

    let reviews = facade.list_reviews(&author(), id).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews.iter().filter(|r| r.is_pending()).count(), 1);
    let pending = reviews.iter().find(|r| r.is_pending()).unwrap();
    assert_eq!(pending.version_number, again.current_version);
}

#[tokio::test]
async fn never_awaits_approval_with_pending_reviews() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-pending", answered(&[("people", 1)]))
        .await
        .unwrap()
        .workflow_id;
    facade
        .submit_for_review(&author(), id, users(&["r1", "r2", "r3"]), None)
        .await
        .unwrap();

    for (i, r) in ["r1", "r2", "r3"].iter().enumerate() {
        let receipt = facade
            .submit_review(&reviewer(r), id, Recommendation::ApproveWithComments, None)
            .await
            .unwrap();
        let pending = facade
            .list_reviews(&author(), id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_pending())
            .count();
        assert_eq!(pending, 2 - i);
        assert_eq!(receipt.summary.state == WorkflowState::AwaitingApproval, pending == 0);
    }
}

#[tokio::test]
async fn version_counter_tracks_content_changes() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-versions", answered(&[("strategy", 1)]))
        .await
        .unwrap()
        .workflow_id;

    for level in 2..=4 {
        facade
            .save_draft(&author(), id, answered(&[("strategy", level)]), Some(format!("level {}", level)))
            .await
            .unwrap();
    }

    let versions = facade.list_versions(&author(), id).await.unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(facade.get_workflow(&author(), id).await.unwrap().current_version, 4);
}

#[tokio::test]
async fn restoring_twice_copies_the_same_content_forward() {
    let facade = memory_facade();
    let original = answered(&[("strategy", 1)]);
    let id = facade
        .initialize(&author(), "a-restore", original.clone())
        .await
        .unwrap()
        .workflow_id;
    facade
        .save_draft(&author(), id, answered(&[("strategy", 5)]), None)
        .await
        .unwrap();

    let first = facade.restore_version(&author(), id, 1).await.unwrap();
    let second = facade.restore_version(&author(), id, 1).await.unwrap();
    assert_eq!(first.current_version, 3);
    assert_eq!(second.current_version, 4);

    for number in [3, 4] {
        let restored = facade.get_version(&author(), id, number).await.unwrap();
        assert_eq!(restored.snapshot, original);
    }

    let missing = facade.restore_version(&author(), id, 42).await.unwrap_err();
    assert!(matches!(missing.error, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn concurrent_submissions_have_one_winner() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-race", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;

    let (author_a, author_b) = (author(), author());
    let (a, b) = tokio::join!(
        facade.submit_for_review(&author_a, id, users(&["r1"]), None),
        facade.submit_for_review(&author_b, id, users(&["r2"]), None),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    let loser = outcomes.into_iter().find_map(Result::err).unwrap();
    assert!(matches!(
        loser.error,
        EngineError::ConcurrentVersionConflict { .. } | EngineError::InvalidTransition { .. }
    ));
    let current = loser.current.unwrap();
    assert_eq!(current.state, WorkflowState::InReview);
    assert_eq!(facade.list_reviews(&author(), id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn forbidden_calls_leave_no_trace() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-forbidden", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;

    let guest = Actor::new("intruder", "guest");
    let err = facade.heartbeat(&guest, id).await.unwrap_err();
    assert!(matches!(err.error, EngineError::Forbidden { .. }));
    assert!(err.current.is_none());
    assert!(facade.list_active(&author(), id).await.unwrap().is_empty());

    // consultants may see the workflow, so the failure carries its state
    let err = facade.approve(&author(), id).await.unwrap_err();
    assert!(matches!(err.error, EngineError::Forbidden { .. }));
    assert_eq!(err.current.unwrap().state, WorkflowState::Draft);

    let events = facade.list_activity(&author(), id, Cursor::START, None).await.unwrap().events;
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn only_assigned_reviewers_may_respond() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-assigned", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;
    facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap();

    let err = facade
        .submit_review(&reviewer("r9"), id, Recommendation::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err.error, EngineError::Forbidden { .. }));

    facade.submit_review(&reviewer("r1"), id, Recommendation::Approve, None).await.unwrap();
    let approved = facade.approve(&approver(), id).await.unwrap();
    assert_eq!(approved.state, WorkflowState::Approved);
}

#[tokio::test]
async fn invalid_transitions_report_current_state() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-invalid", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;

    let err = facade.approve(&approver(), id).await.unwrap_err();
    assert_eq!(err.kind(), "INVALID_TRANSITION");
    assert_eq!(err.current.unwrap().state, WorkflowState::Draft);

    let err = facade.submit_for_review(&author(), id, vec![], None).await.unwrap_err();
    assert!(matches!(err.error, EngineError::ValidationFailed(_)));
}

#[tokio::test]
async fn incomplete_assessments_cannot_be_submitted() {
    let facade = memory_facade();
    let mut snapshot = answered(&[("strategy", 2)]);
    snapshot.answers.insert(AxisId::from("technology"), serde_json::Value::Null);
    let id = facade
        .initialize(&author(), "a-incomplete", snapshot)
        .await
        .unwrap()
        .workflow_id;

    let err = facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap_err();
    assert!(matches!(err.error, EngineError::ValidationFailed(_)));
    assert_eq!(err.current.unwrap().state, WorkflowState::Draft);
}

#[tokio::test]
async fn approved_workflows_can_be_amended_and_archived() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-amend", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;
    facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap();
    facade.submit_review(&reviewer("r1"), id, Recommendation::Approve, None).await.unwrap();
    let approved = facade.approve(&approver(), id).await.unwrap();

    // approval captures the approved content as its own version
    assert_eq!(approved.current_version, 3);

    let amended = facade.amend(&approver(), id).await.unwrap();
    assert_eq!(amended.state, WorkflowState::Draft);
    assert_eq!(amended.current_version, 3);

    let err = facade.archive(&author(), id).await.unwrap_err();
    assert!(matches!(err.error, EngineError::Forbidden { .. }));
    let archived = facade.archive(&admin(), id).await.unwrap();
    assert!(archived.archived);
    assert_eq!(archived.state, WorkflowState::Draft);

    let err = facade
        .save_draft(&author(), id, answered(&[("strategy", 3)]), None)
        .await
        .unwrap_err();
    assert!(matches!(err.error, EngineError::ValidationFailed(_)));
    assert!(err.current.unwrap().archived);
}

#[tokio::test]
async fn initialize_is_idempotent_per_assessment() {
    let facade = memory_facade();
    let first = facade.initialize(&author(), "a-once", answered(&[("strategy", 2)])).await.unwrap();
    let second = facade.initialize(&author(), "a-once", answered(&[("strategy", 4)])).await.unwrap();

    assert_eq!(first.workflow_id, second.workflow_id);
    assert_eq!(second.current_version, 1);
}

#[tokio::test]
async fn comment_threads_stop_at_three_levels() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-comments", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;
    let axis = AxisId::from("strategy");

    let root = facade.add_comment(&author(), id, axis.clone(), None, "why 2?").await.unwrap();
    let reply = facade
        .add_comment(&reviewer("r1"), id, axis.clone(), Some(root.id), "evidence is thin")
        .await
        .unwrap();
    let third = facade
        .add_comment(&author(), id, axis.clone(), Some(reply.id), "added the audit")
        .await
        .unwrap();

    let err = facade
        .add_comment(&reviewer("r1"), id, axis.clone(), Some(third.id), "thanks")
        .await
        .unwrap_err();
    assert!(matches!(err.error, EngineError::ThreadTooDeep { max_depth: 3 }));

    let outcome = facade.resolve_comment(&author(), root.id, false).await.unwrap();
    assert!(outcome.has_warning());
    assert_eq!(outcome.unresolved_descendants, 2);

    let outcome = facade.resolve_comment(&author(), root.id, true).await.unwrap();
    assert_eq!(outcome.resolved.len(), 2);
    assert!(!outcome.has_warning());

    let listed = facade.list_comments(&author(), id, Some(axis)).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|c| c.resolved));
}

#[tokio::test(start_paused = true)]
async fn presence_expires_after_the_liveness_window() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-presence", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;

    let u1 = Actor::new("u1", "reviewer");
    facade.heartbeat(&u1, id).await.unwrap();
    assert_eq!(facade.list_active(&author(), id).await.unwrap().len(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(facade.list_active(&author(), id).await.unwrap().is_empty());
}

#[tokio::test]
async fn long_poll_wakes_on_new_activity() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-longpoll", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;
    let since = facade
        .list_activity(&author(), id, Cursor::START, None)
        .await
        .unwrap()
        .next_cursor;

    let waiter = {
        let facade = facade.clone();
        tokio::spawn(async move {
            facade
                .wait_activity(&author(), id, since, None, Duration::from_secs(5))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    facade
        .save_draft(&author(), id, answered(&[("strategy", 3)]), None)
        .await
        .unwrap();

    let page = waiter.await.unwrap().unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].kind, ActivityKind::DraftSaved);
    assert!(page.next_cursor > since);
}

#[tokio::test]
async fn requesting_more_reviews_extends_the_running_round() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-more-reviews", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;
    facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap();

    let summary = facade.request_reviews(&author(), id, users(&["r1", "r2"])).await.unwrap();
    assert_eq!(summary.state, WorkflowState::InReview);
    assert_eq!(summary.last_activity.unwrap().kind, ActivityKind::ReviewsRequested);

    let reviews = facade.list_reviews(&author(), id).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert!(reviews.iter().all(|r| r.is_pending()));

    // r2 is still pending, so the round stays open
    let receipt = facade
        .submit_review(&reviewer("r1"), id, Recommendation::Approve, None)
        .await
        .unwrap();
    assert_eq!(receipt.summary.state, WorkflowState::InReview);
    assert!(!receipt.was_last);
}

#[tokio::test]
async fn re_requesting_pending_reviewers_writes_nothing() {
    let facade = memory_facade();
    let id = facade
        .initialize(&author(), "a-rerequest", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;
    facade.submit_for_review(&author(), id, users(&["r1", "r2"]), None).await.unwrap();
    let before = facade.list_activity(&author(), id, Cursor::START, None).await.unwrap().events;

    let summary = facade.request_reviews(&author(), id, users(&["r2", "r1"])).await.unwrap();
    assert_eq!(summary.last_activity.unwrap().kind, ActivityKind::SubmittedForReview);

    let after = facade.list_activity(&author(), id, Cursor::START, None).await.unwrap().events;
    assert_eq!(after, before);
    assert_eq!(facade.list_reviews(&author(), id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn review_requests_are_validated() {
    let facade = std::sync::Arc::new(
        assessway::facade::WorkflowFacade::builder(std::sync::Arc::new(assessway::storage::InMemoryStore::new()))
            .directory(std::sync::Arc::new(assessway::access::StaticDirectory::with_users(["r1", "r2"])))
            .build(),
    );
    let id = facade
        .initialize(&author(), "a-validated", answered(&[("strategy", 2)]))
        .await
        .unwrap()
        .workflow_id;

    let err = facade.request_reviews(&author(), id, users(&["r2"])).await.unwrap_err();
    assert!(matches!(
        err.error,
        EngineError::InvalidTransition { current: WorkflowState::Draft, .. }
    ));

    facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap();

    let err = facade.request_reviews(&author(), id, vec![]).await.unwrap_err();
    assert!(matches!(err.error, EngineError::ValidationFailed(_)));

    let err = facade.request_reviews(&author(), id, users(&["r2", "ghost"])).await.unwrap_err();
    match err.error {
        EngineError::ValidationFailed(message) => assert!(message.contains("ghost")),
        other => panic!("expected ValidationFailed, got {:?}", other),
    }
    assert_eq!(facade.list_reviews(&author(), id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_review_requests_open_one_review_per_reviewer() {
    let facade = memory_facade();
    for round in 0..20 {
        let id = facade
            .initialize(&author(), &format!("a-race-reviews-{}", round), answered(&[("strategy", 2)]))
            .await
            .unwrap()
            .workflow_id;
        facade.submit_for_review(&author(), id, users(&["r1"]), None).await.unwrap();

        let calls: Vec<_> = (0..2)
            .map(|_| {
                let facade = facade.clone();
                tokio::spawn(async move { facade.request_reviews(&author(), id, users(&["r3"])).await })
            })
            .collect();
        for call in calls {
            if let Err(failure) = call.await.unwrap() {
                assert!(failure.error.is_retryable());
            }
        }

        let open_for_r3 = facade
            .list_reviews(&author(), id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_pending() && r.reviewer_id.as_str() == "r3")
            .count();
        assert_eq!(open_for_r3, 1);
    }
}

#[tokio::test]
async fn reopening_an_assessment_reports_it_was_not_created() {
    let facade = memory_facade();
    let (first, created) = facade
        .open_or_initialize(&author(), "a-reopen", answered(&[("strategy", 2)]))
        .await
        .unwrap();
    assert!(created);

    let (again, created) = facade
        .open_or_initialize(&author(), "a-reopen", answered(&[("people", 4)]))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.workflow_id, first.workflow_id);
    assert_eq!(again.current_version, 1);
}

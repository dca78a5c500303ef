//! Result aggregator integration tests.

mod common;

use std::sync::Arc;

use devicegrid_coordinator::Config;
use devicegrid_core::{
    CompletionPolicy, CoreError, DeviceId, DeviceStatus, NewTask, SubmitResult, TaskId,
    TaskStatus,
};

use common::TestCoordinator;

fn result(task_id: &TaskId, device: &str, input: &str, output: &str) -> SubmitResult {
    SubmitResult::new(task_id.clone(), DeviceId::new(device), input, output)
}

#[tokio::test]
async fn test_submit_records_result_and_frees_device() {
    let t = TestCoordinator::new();
    t.register(&["a"]).await;
    let task = t
        .create_task(NewTask::new("primes.js", ["7", "8"]).with_required_devices(2))
        .await;
    let lease = t.lease("a").await;

    let accepted = t
        .coordinator
        .submit_result(result(&task.id, "a", &lease.input, "prime"))
        .await
        .unwrap();
    assert_eq!(accepted.result_count, 1);
    assert!(!accepted.completed);

    let stored = t.task(&task.id).await;
    assert_eq!(stored.results.len(), 1);
    assert_eq!(stored.results[0].output, "prime");
    assert_eq!(stored.status, TaskStatus::Pending);
    // The slot stays with its holder once resulted.
    assert!(stored.inputs[0].is_held_by(&DeviceId::new("a")));

    let device = t.device("a").await;
    assert_eq!(device.status, DeviceStatus::Idle);
    assert!(device.lease.is_none());
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let t = TestCoordinator::new();
    t.register(&["a"]).await;

    let err = t
        .coordinator
        .submit_result(result(&TaskId::new("nope"), "a", "1", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_input_not_held_by_device_is_rejected() {
    let t = TestCoordinator::new();
    t.register(&["a", "b"]).await;
    let task = t.create("primes.js", &["1", "2"]).await;
    t.lease("a").await;
    t.lease("b").await;

    // "b" holds "2", not "1".
    let err = t
        .coordinator
        .submit_result(result(&task.id, "b", "1", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotAssigned { .. }));
    assert!(t.task(&task.id).await.results.is_empty());
}

#[tokio::test]
async fn test_missing_fields_are_invalid() {
    let t = TestCoordinator::new();
    let task = t.create("primes.js", &["1"]).await;

    let err = t
        .coordinator
        .submit_result(result(&task.id, "", "1", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));

    let err = t
        .coordinator
        .submit_result(result(&task.id, "a", "", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected_once_recorded() {
    let t = TestCoordinator::new();
    t.register(&["a"]).await;
    let task = t
        .create_task(NewTask::new("primes.js", ["1", "2"]).with_required_devices(2))
        .await;
    let lease = t.lease("a").await;

    t.coordinator
        .submit_result(result(&task.id, "a", &lease.input, "prime"))
        .await
        .unwrap();
    let err = t
        .coordinator
        .submit_result(result(&task.id, "a", &lease.input, "prime"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateResult { .. }));
    assert_eq!(t.task(&task.id).await.results.len(), 1);
}

#[tokio::test]
async fn test_duplicate_after_done_is_still_duplicate() {
    let t = TestCoordinator::new();
    t.register(&["a"]).await;
    let task = t.create("primes.js", &["1"]).await;
    let lease = t.lease("a").await;

    t.coordinator
        .submit_result(result(&task.id, "a", &lease.input, "prime"))
        .await
        .unwrap();
    let err = t
        .coordinator
        .submit_result(result(&task.id, "a", &lease.input, "prime"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateResult { .. }));
}

#[tokio::test]
async fn test_done_task_closes_to_other_holders() {
    let t = TestCoordinator::new();
    t.register(&["a", "b"]).await;
    let task = t.create("primes.js", &["1", "2"]).await;
    let lease_a = t.lease("a").await;
    let lease_b = t.lease("b").await;

    let accepted = t
        .coordinator
        .submit_result(result(&task.id, "a", &lease_a.input, "prime"))
        .await
        .unwrap();
    assert!(accepted.completed);

    let err = t
        .coordinator
        .submit_result(result(&task.id, "b", &lease_b.input, "composite"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TaskClosed(_)));

    let stored = t.task(&task.id).await;
    assert_eq!(stored.status, TaskStatus::Done);
    assert_eq!(stored.results.len(), 1);
    assert_eq!(t.device("b").await.status, DeviceStatus::Idle);
}

#[tokio::test]
async fn test_total_results_completes_at_required_count() {
    assert_eq!(
        Config::default().completion_policy,
        CompletionPolicy::TotalResults
    );

    let t = TestCoordinator::new();
    t.register(&["a", "b", "c"]).await;
    let task = t
        .create_task(NewTask::new("primes.js", ["1", "2", "3"]).with_required_devices(2))
        .await;
    let leases = [t.lease("a").await, t.lease("b").await, t.lease("c").await];

    let first = t
        .coordinator
        .submit_result(result(&task.id, "a", &leases[0].input, "x"))
        .await
        .unwrap();
    assert!(!first.completed);
    assert_eq!(t.task(&task.id).await.status, TaskStatus::Running);

    let second = t
        .coordinator
        .submit_result(result(&task.id, "b", &leases[1].input, "y"))
        .await
        .unwrap();
    assert!(second.completed);
    assert_eq!(t.task(&task.id).await.status, TaskStatus::Done);
}

#[tokio::test]
async fn test_every_input_waits_for_all_slots() {
    let config = Config {
        completion_policy: CompletionPolicy::EveryInput,
        ..Config::default()
    };
    let t = TestCoordinator::with_config(config);
    t.register(&["a", "b"]).await;
    let task = t.create("primes.js", &["1", "2"]).await;
    let lease_a = t.lease("a").await;
    let lease_b = t.lease("b").await;

    let first = t
        .coordinator
        .submit_result(result(&task.id, "a", &lease_a.input, "x"))
        .await
        .unwrap();
    assert!(!first.completed);

    let second = t
        .coordinator
        .submit_result(result(&task.id, "b", &lease_b.input, "y"))
        .await
        .unwrap();
    assert!(second.completed);
    assert_eq!(t.task(&task.id).await.status, TaskStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_submissions_record_once() {
    let t = Arc::new(TestCoordinator::new());
    t.register(&["a"]).await;
    let task = t
        .create_task(NewTask::new("primes.js", ["1", "2"]).with_required_devices(2))
        .await;
    let lease = t.lease("a").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let t = t.clone();
        let submission = result(&task.id, "a", &lease.input, "prime");
        handles.push(tokio::spawn(async move {
            t.coordinator.submit_result(submission).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(CoreError::DuplicateResult { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(t.task(&task.id).await.results.len(), 1);
}

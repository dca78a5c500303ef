//! End-to-end walkthroughs of device polling, reclamation, and completion.

mod common;

use devicegrid_core::{Assignment, DeviceId, DeviceStatus, SubmitResult, TaskStatus};

use common::TestCoordinator;

#[tokio::test]
async fn test_two_devices_one_required_result() {
    let t = TestCoordinator::new();
    t.register(&["A", "B"]).await;
    let task = t.create("primes.js", &["1", "2"]).await;
    assert_eq!(task.required_device_count, 1);
    assert_eq!(task.priority, 1);

    let a = t.lease("A").await;
    assert_eq!(a.input, "1");
    assert_eq!(t.task(&task.id).await.status, TaskStatus::Pending);

    let b = t.lease("B").await;
    assert_eq!(b.input, "2");
    assert_eq!(t.task(&task.id).await.status, TaskStatus::Running);

    let accepted = t
        .coordinator
        .submit_result(SubmitResult::new(
            task.id.clone(),
            DeviceId::new("A"),
            "1",
            "prime",
        ))
        .await
        .unwrap();
    assert!(accepted.completed);

    // Done after one result even though "2" never reported.
    let done = t.task(&task.id).await;
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.results.len(), 1);
    assert_eq!(done.results[0].device_id, DeviceId::new("A"));

    assert_eq!(t.device("A").await.status, DeviceStatus::Idle);
    assert_eq!(t.device("B").await.status, DeviceStatus::Idle);
}

#[tokio::test]
async fn test_device_dies_mid_task_and_work_moves_on() {
    let t = TestCoordinator::new();
    t.register(&["A", "B"]).await;
    let task = t.create("primes.js", &["11"]).await;

    let lease = t.lease("A").await;
    assert_eq!(lease.input, "11");

    // "B" polls while "A" has gone quiet.
    t.advance_secs(30);
    assert_eq!(
        t.coordinator
            .request_assignment(&DeviceId::new("B"))
            .await
            .unwrap(),
        Assignment::NoWork
    );
    t.advance_secs(31);
    t.coordinator.heartbeat(&DeviceId::new("B")).await.unwrap();
    t.coordinator.sweep_once().await;
    assert_eq!(t.device("A").await.status, DeviceStatus::Disconnected);

    let retry = t.lease("B").await;
    assert_eq!(retry.slot, lease.slot);
    t.coordinator
        .submit_result(SubmitResult::new(
            task.id.clone(),
            DeviceId::new("B"),
            "11",
            "prime",
        ))
        .await
        .unwrap();
    assert_eq!(t.task(&task.id).await.status, TaskStatus::Done);

    // "A" comes back, finds its lease gone, and cannot report.
    t.coordinator.heartbeat(&DeviceId::new("A")).await.unwrap();
    assert_eq!(t.device("A").await.status, DeviceStatus::Idle);
    assert!(t
        .coordinator
        .submit_result(SubmitResult::new(
            task.id.clone(),
            DeviceId::new("A"),
            "11",
            "prime",
        ))
        .await
        .is_err());
    assert_eq!(t.task(&task.id).await.results.len(), 1);
}

// ABOUTME: Integration tests for the event monitor.
// ABOUTME: Exit and OOM events flowing from the engine into container status.

mod support;

use chrono::Utc;
use crishim::runtime::{MockOp, TaskEvent, TaskExit};
use crishim::server::{ContainerFilter, EventMonitor, ServiceError};
use crishim::store::{Checkpoint, ContainerState, REASON_OOM_KILLED, unix_nanos};
use std::time::Duration;
use support::Fixture;

#[tokio::test]
async fn exit_event_finishes_container() {
    let fx = Fixture::new();
    let monitor = EventMonitor::start(fx.service.clone());
    let (_, id) = fx.created("app").await;
    fx.service.start_container(&id).await.unwrap();

    fx.engine.exit(id.as_str(), 3).await.unwrap();
    fx.wait_for_state(&id, ContainerState::Exited).await;

    let status = fx.status(&id);
    assert_eq!(status.pid, 0);
    assert_eq!(status.exit_code, 3);
    assert!(status.finished_at >= status.started_at);
    assert!(!fx.engine.has_task(id.as_str()));
    assert_eq!(
        Checkpoint::new(fx.state_dir.path(), &id)
            .read_status()
            .unwrap(),
        status
    );

    let view = fx.service.container_status(&id).unwrap();
    assert_eq!(view.reason, "Error");

    monitor.stop().await;
}

#[tokio::test]
async fn oom_reason_survives_the_exit() {
    let fx = Fixture::new();
    let monitor = EventMonitor::start(fx.service.clone());
    let (_, id) = fx.created("app").await;
    fx.service.start_container(&id).await.unwrap();

    fx.engine.oom(id.as_str());
    let service = &fx.service;
    support::wait_until(|| {
        service.containers().get(&id).unwrap().status.get().reason == REASON_OOM_KILLED
    })
    .await;
    fx.engine.exit(id.as_str(), 137).await.unwrap();
    fx.wait_for_state(&id, ContainerState::Exited).await;

    let view = fx.service.container_status(&id).unwrap();
    assert_eq!(view.reason, REASON_OOM_KILLED);
    assert_eq!(view.exit_code, 137);

    monitor.stop().await;
}

#[tokio::test]
async fn exit_of_other_process_is_ignored() {
    let fx = Fixture::new();
    let (_, id) = fx.created("app").await;
    fx.service.start_container(&id).await.unwrap();
    let before = fx.status(&id);

    fx.service
        .handle_event(TaskEvent::Exit(TaskExit {
            container_id: id.to_string(),
            pid: before.pid + 100,
            exit_status: 1,
            exited_at: Utc::now(),
        }))
        .await
        .unwrap();

    assert_eq!(fx.status(&id), before);
    assert_eq!(fx.engine.calls(MockOp::DeleteTask), 0);
}

#[tokio::test]
async fn events_for_unknown_containers_are_ignored() {
    let fx = Fixture::new();
    fx.service
        .handle_event(TaskEvent::Oom {
            container_id: "missing".to_string(),
        })
        .await
        .unwrap();
    assert!(
        fx.service
            .list_containers(&ContainerFilter::default())
            .is_empty()
    );
}

#[tokio::test]
async fn exit_waits_for_the_transaction_recording_its_pid() {
    let fx = Fixture::new();
    let (_, id) = fx.created("app").await;
    let container = fx.service.containers().get(&id).unwrap();
    let (entered, wait_entered) = tokio::sync::oneshot::channel();

    // A start that has launched pid 4242 but not yet recorded it.
    let txn = tokio::spawn(async move {
        container
            .status
            .update_async(|mut status| async move {
                let _ = entered.send(());
                tokio::time::sleep(Duration::from_millis(50)).await;
                status.pid = 4242;
                status.started_at = unix_nanos();
                (status, Ok::<_, ServiceError>(()))
            })
            .await
    });
    wait_entered.await.unwrap();

    fx.service
        .handle_event(TaskEvent::Exit(TaskExit {
            container_id: id.to_string(),
            pid: 4242,
            exit_status: 9,
            exited_at: Utc::now(),
        }))
        .await
        .unwrap();
    txn.await.unwrap().unwrap();

    let status = fx.status(&id);
    assert_eq!(status.state(), ContainerState::Exited);
    assert_eq!(status.exit_code, 9);
}

#[tokio::test]
async fn monitor_stops_on_request() {
    let fx = Fixture::new();
    let monitor = EventMonitor::start(fx.service.clone());
    tokio::time::timeout(Duration::from_secs(1), monitor.stop())
        .await
        .unwrap();
}

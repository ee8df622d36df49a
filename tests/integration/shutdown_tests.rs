//! Cancellation of idle and mid-cycle cells.

use std::time::Duration;

use cell_handoff::models::{CellEvent, ConveyorStatus, Direction, ObjectKind, WorkerStatus, WorkerId};

use super::test_helpers::{collect_until, rig, start_cell, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn idle_cell_stops_promptly() {
    let config = test_config();
    let rig = rig(&config, &[], &[]);
    let (cell, _events) = start_cell(&config, &rig).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let coordinator = cell.coordinator().clone();
    tokio::time::timeout(Duration::from_secs(2), cell.shutdown())
        .await
        .expect("shutdown completes");

    for id in WorkerId::ALL {
        assert_eq!(coordinator.worker_status(id), WorkerStatus::NotReady);
    }
    assert!(!coordinator.has_fault());
}

/// Cancelling while the belt settles past the midpoint stops the belt and
/// leaves the record at `Ready` for the next run.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_mid_transit_stops_belt_and_forces_ready() {
    let mut config = test_config();
    config.conveyor.right.settle_ms = 60_000;
    let rig = rig(&config, &[ObjectKind::Cube], &[]);
    let (cell, mut events) = start_cell(&config, &rig).await;

    collect_until(&mut events, |e| {
        matches!(
            e,
            CellEvent::ConveyorTransition {
                to: ConveyorStatus::Moving,
                ..
            }
        )
    })
    .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rig.belt_running());

    let coordinator = cell.coordinator().clone();
    tokio::time::timeout(Duration::from_secs(2), cell.shutdown())
        .await
        .expect("shutdown completes");

    let belt = coordinator.conveyor().await;
    assert_eq!(belt.status(), ConveyorStatus::Ready);
    assert_eq!(belt.direction(), Direction::None);
    assert!(!rig.belt_running());

    let stop_output = config.conveyor.stop_output;
    let log = rig.digital_log();
    let run = log
        .iter()
        .position(|&(channel, high)| channel == config.conveyor.right.run_output && high)
        .expect("belt was started");
    assert!(log[run..]
        .iter()
        .any(|&(channel, high)| channel == stop_output && high));

    let forced = collect_until(&mut events, |e| {
        matches!(
            e,
            CellEvent::ConveyorTransition {
                to: ConveyorStatus::Ready,
                ..
            }
        )
    })
    .await;
    assert!(matches!(
        forced.last(),
        Some(CellEvent::ConveyorTransition {
            from: ConveyorStatus::Moving,
            ..
        })
    ));
}

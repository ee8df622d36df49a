//! Behaviour when every belt sensor answers out of range.

use std::time::Duration;

use cell_handoff::models::{CellEvent, ConveyorStatus, Direction, ObjectKind, WorkerId};

use super::test_helpers::{collect_until, rig, start_cell, test_config};

/// With nothing to hand across and blind sensors, the belt never leaves
/// `Ready` and nobody is given a token.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_sensors_keep_belt_idle_and_tokens_empty() {
    let config = test_config();
    let rig = rig(&config, &[], &[]);
    rig.set_sensors_dead(true);
    let (cell, mut events) = start_cell(&config, &rig).await;
    let coordinator = cell.coordinator().clone();

    for _ in 0..50 {
        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.conveyor.status(), ConveyorStatus::Ready);
        assert_eq!(snapshot.conveyor.direction(), Direction::None);
        assert!(snapshot.tokens.is_idle());
        tokio::time::sleep(Duration::from_millis(4)).await;
    }

    cell.shutdown().await;

    while let Ok(event) = events.try_recv() {
        match event {
            CellEvent::TokensAssigned { mover } => assert_eq!(mover, None),
            CellEvent::ConveyorTransition { .. } => panic!("belt moved: {event:?}"),
            _ => {}
        }
    }
    assert!(rig.digital_log().is_empty());
}

/// A loaded belt that no sensor can see is never started, so the picker
/// waits and nothing is unloaded.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_sensors_strand_a_loaded_batch() {
    let config = test_config();
    let rig = rig(&config, &[ObjectKind::Cube, ObjectKind::Cube], &[]);
    rig.set_sensors_dead(true);
    let (cell, mut events) = start_cell(&config, &rig).await;

    let seen = collect_until(&mut events, |e| matches!(e, CellEvent::BatchLoaded { .. })).await;
    assert!(seen.contains(&CellEvent::TokensAssigned {
        mover: Some(WorkerId::Worker1)
    }));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let snapshot = cell.coordinator().snapshot().await;
    assert_eq!(snapshot.conveyor.status(), ConveyorStatus::Ready);
    assert_eq!(snapshot.conveyor.items_on_belt(), 2);
    assert_eq!(snapshot.tokens.picker, Some(WorkerId::Worker2));
    assert_eq!(snapshot.tokens.mover, None);
    assert_eq!(rig.belt_items(), 2);
    assert!(rig.placed(WorkerId::Worker2).is_empty());

    cell.shutdown().await;

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                CellEvent::BatchUnloaded { .. }
                    | CellEvent::ConveyorTransition {
                        to: ConveyorStatus::Moving,
                        ..
                    }
            ),
            "unexpected event {event:?}"
        );
    }
}

//! End-to-end handoff of one batch across the belt.

use cell_handoff::models::{CellEvent, ConveyorStatus, Direction, ObjectKind, WorkerId};

use super::test_helpers::{collect_until, rig, start_cell, test_config};

/// Worker1 sees two cubes it must hand over, worker2 sees nothing. Worker1
/// becomes the mover, loads both, the belt carries them right and worker2
/// takes exactly two off before both slot stacks return to their base.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_cubes_cross_the_belt_in_one_cycle() {
    let config = test_config();
    let rig = rig(&config, &[ObjectKind::Cube, ObjectKind::Cube], &[]);
    let (cell, mut events) = start_cell(&config, &rig).await;

    let seen = collect_until(&mut events, |e| *e == CellEvent::PassComplete).await;

    assert_eq!(
        seen.first(),
        Some(&CellEvent::TokensAssigned {
            mover: Some(WorkerId::Worker1)
        })
    );

    let loaded = seen
        .iter()
        .find_map(|e| match e {
            CellEvent::BatchLoaded {
                worker,
                batch,
                count,
            } => Some((*worker, *batch, *count)),
            _ => None,
        })
        .expect("batch loaded");
    assert_eq!(loaded.0, WorkerId::Worker1);
    assert_eq!(loaded.2, 2);

    let unloaded = seen
        .iter()
        .find_map(|e| match e {
            CellEvent::BatchUnloaded {
                worker,
                batch,
                count,
            } => Some((*worker, *batch, *count)),
            _ => None,
        })
        .expect("batch unloaded");
    assert_eq!(unloaded, (WorkerId::Worker2, Some(loaded.1), 2));

    assert!(seen.contains(&CellEvent::ConveyorTransition {
        from: ConveyorStatus::Ready,
        to: ConveyorStatus::Moving,
        direction: Direction::Right,
    }));

    let coordinator = cell.coordinator().clone();
    let slots = coordinator.slots().await;
    for id in WorkerId::ALL {
        let stack = slots.stack(id);
        assert!(stack.is_empty(), "{id} slots still hold history");
        assert_eq!(stack.level(), 0);
    }
    let mut replay = slots.clone();
    let first = replay.advance().expect("in sync");
    assert_eq!(first.for_worker(WorkerId::Worker1), slots.stack(WorkerId::Worker1).base());
    assert_eq!(first.for_worker(WorkerId::Worker2), slots.stack(WorkerId::Worker2).base());

    let belt = coordinator.conveyor().await;
    assert_eq!(belt.status(), ConveyorStatus::Ready);
    assert_eq!(belt.direction(), Direction::None);
    assert_eq!(belt.items_on_belt(), 0);

    assert!(rig.loose(WorkerId::Worker1).is_empty());
    let received = rig.placed(WorkerId::Worker2);
    assert_eq!(received.len(), 2);
    assert!(received.iter().all(|s| s.kind == ObjectKind::Cube));
    assert_eq!(rig.belt_items(), 0);

    cell.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn own_kind_is_sorted_into_placement_stack() {
    let config = test_config();
    let rig = rig(
        &config,
        &[ObjectKind::Cylinder, ObjectKind::Cylinder, ObjectKind::Cylinder],
        &[],
    );
    let (cell, mut events) = start_cell(&config, &rig).await;

    let seen = collect_until(&mut events, |e| *e == CellEvent::PassComplete).await;
    let sorted: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            CellEvent::ItemSorted {
                worker, position, ..
            } => Some((*worker, *position)),
            _ => None,
        })
        .collect();

    assert_eq!(sorted.len(), 3);
    assert!(sorted.iter().all(|(w, _)| *w == WorkerId::Worker1));
    // Two levels per column: base, one cylinder up, then the next column.
    let footprint = ObjectKind::Cylinder.footprint();
    assert!((sorted[1].1.z - sorted[0].1.z - footprint.z).abs() < 1e-9);
    assert!((sorted[2].1.z - sorted[0].1.z).abs() < 1e-9);
    assert!((sorted[0].1.x - sorted[2].1.x - (footprint.x + 0.01)).abs() < 1e-9);

    assert!(!seen.iter().any(|e| matches!(e, CellEvent::BatchLoaded { .. })));
    assert_eq!(rig.placed(WorkerId::Worker1).len(), 3);

    cell.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_is_capped_at_configured_size() {
    let mut config = test_config();
    config.handoff.batch_size = 2;
    let rig = rig(
        &config,
        &[],
        &[ObjectKind::Cylinder, ObjectKind::Cylinder, ObjectKind::Cylinder],
    );
    let (cell, mut events) = start_cell(&config, &rig).await;

    let seen = collect_until(&mut events, |e| *e == CellEvent::PassComplete).await;
    let loads: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            CellEvent::BatchLoaded { worker, count, .. } => Some((*worker, *count)),
            _ => None,
        })
        .collect();

    assert_eq!(loads, vec![(WorkerId::Worker2, 2), (WorkerId::Worker2, 1)]);
    assert!(seen.contains(&CellEvent::ConveyorTransition {
        from: ConveyorStatus::Ready,
        to: ConveyorStatus::Moving,
        direction: Direction::Left,
    }));
    assert_eq!(rig.placed(WorkerId::Worker1).len(), 3);

    cell.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tokens_never_name_the_same_worker_twice() {
    let config = test_config();
    let rig = rig(
        &config,
        &[ObjectKind::Cube, ObjectKind::Cube, ObjectKind::Cylinder],
        &[ObjectKind::Cylinder],
    );
    let (cell, mut events) = start_cell(&config, &rig).await;
    let coordinator = cell.coordinator().clone();

    let watcher = tokio::spawn(async move {
        loop {
            let tokens = coordinator.tokens().await;
            if let (Some(mover), Some(picker)) = (tokens.mover, tokens.picker) {
                assert_ne!(mover, picker, "one worker holds both tokens");
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    });

    collect_until(&mut events, |e| *e == CellEvent::PassComplete).await;
    watcher.abort();
    let err = watcher.await.expect_err("watcher only ends when aborted");
    assert!(err.is_cancelled(), "token watcher failed: {err}");

    assert_eq!(rig.placed(WorkerId::Worker2).len(), 2);
    assert_eq!(rig.placed(WorkerId::Worker1).len(), 2);

    cell.shutdown().await;
}

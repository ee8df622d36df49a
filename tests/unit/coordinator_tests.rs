//! Unit tests for the token decision, rendezvous and shared belt record.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use cell_handoff::geometry::{Position3D, Vec2};
use cell_handoff::models::{CellEvent, ConveyorStatus, Direction, WorkerId, WorkerStatus, Workload};
use cell_handoff::orchestrator::coordinator::{decide_mover, Coordinator, Decision};
use cell_handoff::placement::{PlacementStack, SlotPair};
use cell_handoff::AppError;
use tokio_util::sync::CancellationToken;

fn load(moves: usize, stores: usize) -> Workload {
    Workload { moves, stores }
}

fn slot_stack(name: &str) -> PlacementStack {
    PlacementStack::new(
        name,
        Position3D::new(0.0, 0.4, 0.0),
        Vec2::new(1.0, 0.0),
        NonZeroUsize::MIN,
        Position3D::new(0.06, 0.06, 0.075),
    )
}

fn coordinator() -> Arc<Coordinator> {
    Arc::new(Coordinator::new(SlotPair::new(slot_stack("w1"), slot_stack("w2"))))
}

async fn meet(
    coordinator: &Arc<Coordinator>,
    worker1: Workload,
    worker2: Workload,
) -> (Option<Decision>, Option<Decision>) {
    let cancel = CancellationToken::new();
    let peer = Arc::clone(coordinator);
    let peer_cancel = cancel.clone();
    let second = tokio::spawn(async move {
        peer.rendezvous(WorkerId::Worker2, worker2, &peer_cancel).await
    });
    let first = coordinator
        .rendezvous(WorkerId::Worker1, worker1, &cancel)
        .await
        .unwrap();
    (first, second.await.unwrap().unwrap())
}

#[test]
fn smaller_workload_becomes_mover() {
    assert_eq!(decide_mover([load(3, 4), load(1, 0)]), Some(WorkerId::Worker2));
    assert_eq!(decide_mover([load(1, 0), load(2, 2)]), Some(WorkerId::Worker1));
}

#[test]
fn ties_go_to_worker1() {
    assert_eq!(decide_mover([load(2, 1), load(1, 2)]), Some(WorkerId::Worker1));
}

#[test]
fn only_workers_with_moves_are_candidates() {
    assert_eq!(decide_mover([load(2, 0), load(0, 0)]), Some(WorkerId::Worker1));
    assert_eq!(decide_mover([load(0, 0), load(1, 5)]), Some(WorkerId::Worker2));
    assert_eq!(decide_mover([load(0, 3), load(0, 1)]), None);
    assert_eq!(decide_mover([load(0, 0), load(0, 0)]), None);
}

#[tokio::test]
async fn rendezvous_gives_both_workers_the_same_decision() {
    let coordinator = coordinator();
    let mut events = coordinator.subscribe();

    let (first, second) = meet(&coordinator, load(2, 0), load(0, 0)).await;
    assert_eq!(first, second);
    assert_eq!(first.unwrap().mover, Some(WorkerId::Worker1));
    assert!(!first.unwrap().pass_complete);

    let tokens = coordinator.tokens().await;
    assert_eq!(tokens.mover, Some(WorkerId::Worker1));
    assert_eq!(tokens.picker, None);
    assert_eq!(
        events.recv().await.unwrap(),
        CellEvent::TokensAssigned {
            mover: Some(WorkerId::Worker1)
        }
    );
}

#[tokio::test]
async fn empty_cells_without_history_do_not_complete_a_pass() {
    let coordinator = coordinator();
    let (first, _) = meet(&coordinator, load(0, 0), load(0, 0)).await;
    assert_eq!(
        first,
        Some(Decision {
            mover: None,
            pass_complete: false
        })
    );
}

#[tokio::test]
async fn full_batch_moves_tokens_and_belt_in_order() {
    let coordinator = coordinator();
    meet(&coordinator, load(2, 0), load(0, 0)).await;

    assert!(!coordinator.begin_loading(WorkerId::Worker2).await.unwrap());
    assert!(coordinator.begin_loading(WorkerId::Worker1).await.unwrap());
    assert_eq!(coordinator.conveyor().await.status(), ConveyorStatus::Loading);

    for _ in 0..2 {
        coordinator.advance_slot(WorkerId::Worker1).await.unwrap();
        coordinator.record_loaded_item().await;
    }
    let batch = coordinator
        .finish_loading(WorkerId::Worker1)
        .await
        .unwrap()
        .expect("batch id");

    let tokens = coordinator.tokens().await;
    assert_eq!(tokens.mover, None);
    assert_eq!(tokens.picker, Some(WorkerId::Worker2));
    assert_eq!(tokens.batch, Some(batch));
    assert_eq!(coordinator.conveyor().await.items_on_belt(), 2);

    assert!(coordinator.begin_transit(Direction::Right).await.unwrap());
    assert!(!coordinator.begin_transit(Direction::Right).await.unwrap());
    coordinator.arrive().await.unwrap();
    assert_eq!(coordinator.conveyor().await.direction(), Direction::Right);

    coordinator.retreat_slot(WorkerId::Worker2).await.unwrap();
    coordinator.retreat_slot(WorkerId::Worker2).await.unwrap();
    assert!(matches!(
        coordinator.retreat_slot(WorkerId::Worker2).await,
        Err(AppError::EmptyHistory(_))
    ));
    coordinator.finish_unloading(WorkerId::Worker2, 2).await;
    coordinator.release_belt().await.unwrap();

    let snapshot = coordinator.snapshot().await;
    assert!(snapshot.tokens.is_idle());
    assert_eq!(snapshot.tokens.batch, None);
    assert_eq!(snapshot.conveyor.status(), ConveyorStatus::Ready);
    assert_eq!(snapshot.conveyor.items_on_belt(), 0);
    assert_eq!(coordinator.issued_slots().await, Some(0));

    let (decision, _) = meet(&coordinator, load(0, 0), load(0, 0)).await;
    assert!(decision.unwrap().pass_complete);
}

#[tokio::test]
async fn empty_load_releases_move_token_without_a_picker() {
    let coordinator = coordinator();
    meet(&coordinator, load(1, 0), load(0, 0)).await;
    assert!(coordinator.begin_loading(WorkerId::Worker1).await.unwrap());
    assert_eq!(coordinator.finish_loading(WorkerId::Worker1).await.unwrap(), None);
    assert!(coordinator.tokens().await.is_idle());
}

#[tokio::test]
async fn relinquish_only_drops_own_token() {
    let coordinator = coordinator();
    meet(&coordinator, load(1, 0), load(0, 0)).await;
    coordinator.relinquish_move(WorkerId::Worker2).await;
    assert_eq!(coordinator.tokens().await.mover, Some(WorkerId::Worker1));
    coordinator.relinquish_move(WorkerId::Worker1).await;
    assert!(coordinator.tokens().await.is_idle());
}

#[tokio::test]
async fn fault_mid_load_releases_belt_and_passes_placed_items() {
    let coordinator = coordinator();
    meet(&coordinator, load(3, 0), load(0, 0)).await;
    assert!(coordinator.begin_loading(WorkerId::Worker1).await.unwrap());
    coordinator.advance_slot(WorkerId::Worker1).await.unwrap();
    coordinator.record_loaded_item().await;
    // Second slot issued, item never placed.
    coordinator.advance_slot(WorkerId::Worker1).await.unwrap();

    let mut events = coordinator.subscribe();
    coordinator
        .fault(WorkerId::Worker1, &AppError::Motion("protective stop".into()))
        .await;

    let snapshot = coordinator.snapshot().await;
    assert_eq!(snapshot.conveyor.status(), ConveyorStatus::Ready);
    assert_eq!(snapshot.tokens.mover, None);
    assert_eq!(snapshot.tokens.picker, Some(WorkerId::Worker2));
    assert!(snapshot.tokens.batch.is_some());
    assert_eq!(coordinator.issued_slots().await, Some(1));
    assert!(coordinator.has_fault());

    let mut faulted = false;
    while let Ok(event) = events.try_recv() {
        if let CellEvent::WorkerFaulted { worker, reason } = event {
            assert_eq!(worker, WorkerId::Worker1);
            assert_eq!(reason, "motion: protective stop");
            faulted = true;
        }
    }
    assert!(faulted);
}

#[tokio::test]
async fn faulted_picker_drops_pickup_token() {
    let coordinator = coordinator();
    meet(&coordinator, load(1, 0), load(0, 0)).await;
    coordinator.begin_loading(WorkerId::Worker1).await.unwrap();
    coordinator.advance_slot(WorkerId::Worker1).await.unwrap();
    coordinator.record_loaded_item().await;
    coordinator.finish_loading(WorkerId::Worker1).await.unwrap();

    coordinator
        .fault(WorkerId::Worker2, &AppError::Motion("arm stop".into()))
        .await;
    let tokens = coordinator.tokens().await;
    assert!(tokens.is_idle());
    assert!(!tokens.holds(WorkerId::Worker2));
}

#[tokio::test]
async fn rendezvous_is_disabled_after_a_fault() {
    let coordinator = coordinator();
    let cancel = CancellationToken::new();
    let waiting = {
        let coordinator = Arc::clone(&coordinator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            coordinator
                .rendezvous(WorkerId::Worker2, load(0, 0), &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    coordinator
        .fault(WorkerId::Worker1, &AppError::Motion("stop".into()))
        .await;

    assert_eq!(waiting.await.unwrap().unwrap(), None);
    assert_eq!(
        coordinator
            .rendezvous(WorkerId::Worker2, load(1, 0), &cancel)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn rendezvous_is_abandoned_on_shutdown() {
    let coordinator = coordinator();
    let cancel = CancellationToken::new();
    let waiting = {
        let coordinator = Arc::clone(&coordinator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            coordinator
                .rendezvous(WorkerId::Worker1, load(0, 0), &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let err = waiting.await.unwrap().unwrap_err();
    assert!(err.is_shutdown());
    assert!(!coordinator.has_fault());
}

#[tokio::test]
async fn desync_resets_both_stacks_and_belt_count() {
    let mut ahead = slot_stack("w1");
    ahead.next();
    let coordinator = Coordinator::new(SlotPair::new(ahead, slot_stack("w2")));
    let mut events = coordinator.subscribe();
    coordinator.record_loaded_item().await;

    let err = coordinator.advance_slot(WorkerId::Worker1).await.unwrap_err();
    assert!(matches!(err, AppError::Desync(_)));
    assert_eq!(coordinator.issued_slots().await, Some(0));
    assert_eq!(coordinator.conveyor().await.items_on_belt(), 0);
    assert_eq!(
        events.recv().await.unwrap(),
        CellEvent::DesyncRecovered {
            worker: WorkerId::Worker1
        }
    );

    assert!(coordinator.advance_slot(WorkerId::Worker1).await.is_ok());
}

#[tokio::test]
async fn abandoned_cycle_forces_ready() {
    let coordinator = coordinator();
    assert!(coordinator.begin_transit(Direction::Left).await.unwrap());
    coordinator.abandon_cycle().await;
    let belt = coordinator.conveyor().await;
    assert_eq!(belt.status(), ConveyorStatus::Ready);
    assert_eq!(belt.direction(), Direction::None);
}

#[test]
fn moving_guard_spans_the_whole_motion() {
    let coordinator = coordinator();
    let cell = coordinator.status_cell(WorkerId::Worker2);
    cell.store(WorkerStatus::Ready);
    {
        let _moving = cell.moving();
        assert_eq!(coordinator.worker_status(WorkerId::Worker2), WorkerStatus::Moving);
        assert!(coordinator.any_moving());
    }
    assert_eq!(coordinator.worker_status(WorkerId::Worker2), WorkerStatus::Ready);
    assert!(!coordinator.any_moving());
}

#[tokio::test]
async fn rebalance_is_deferred_while_the_peer_moves() {
    let coordinator = coordinator();
    let cancel = CancellationToken::new();
    let moving = coordinator.status_cell(WorkerId::Worker2).moving();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        coordinator.rebalance(WorkerId::Worker1, load(0, 0), &cancel),
    )
    .await
    .expect("returns without waiting on the peer");
    assert_eq!(outcome.unwrap(), None);
    assert_eq!(coordinator.tokens().await.mover, None);

    drop(moving);
    let peer = Arc::clone(&coordinator);
    let peer_cancel = cancel.clone();
    let second = tokio::spawn(async move {
        peer.rebalance(WorkerId::Worker2, load(0, 0), &peer_cancel).await
    });
    let first = coordinator
        .rebalance(WorkerId::Worker1, load(1, 0), &cancel)
        .await
        .unwrap();
    let expected = Some(Decision {
        mover: Some(WorkerId::Worker1),
        pass_complete: false,
    });
    assert_eq!(first, expected);
    assert_eq!(second.await.unwrap().unwrap(), expected);
}

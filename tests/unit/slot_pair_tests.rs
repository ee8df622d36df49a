//! Unit tests for the mirrored belt slot stacks.

use std::num::NonZeroUsize;

use cell_handoff::geometry::{Position3D, Vec2};
use cell_handoff::models::WorkerId;
use cell_handoff::placement::{PlacementStack, SlotPair};
use cell_handoff::AppError;

fn slots(name: &str, base: Position3D, x: f64) -> PlacementStack {
    PlacementStack::new(
        name,
        base,
        Vec2::new(x, 0.0),
        NonZeroUsize::MIN,
        Position3D::new(0.06, 0.06, 0.075),
    )
}

fn pair() -> SlotPair {
    SlotPair::new(
        slots("w1", Position3D::new(0.015, 0.401, -0.022), 1.0),
        slots("w2", Position3D::new(-0.015, 0.401, -0.022), -1.0),
    )
}

#[test]
fn advance_moves_both_frames_together() {
    let mut pair = pair();
    let first = pair.advance().unwrap();
    let second = pair.advance().unwrap();

    assert_eq!(first.for_worker(WorkerId::Worker1), Position3D::new(0.015, 0.401, -0.022));
    assert_eq!(first.for_worker(WorkerId::Worker2), Position3D::new(-0.015, 0.401, -0.022));
    assert!((second.for_worker(WorkerId::Worker1).x - 0.085).abs() < 1e-9);
    assert!((second.for_worker(WorkerId::Worker2).x + 0.085).abs() < 1e-9);
    assert_eq!(pair.issued(), Some(2));
}

#[test]
fn retreat_unwinds_in_reverse_order() {
    let mut pair = pair();
    let first = pair.advance().unwrap();
    let second = pair.advance().unwrap();
    assert_eq!(pair.retreat().unwrap(), second);
    assert_eq!(pair.retreat().unwrap(), first);
    assert!(matches!(pair.retreat(), Err(AppError::EmptyHistory(_))));
    assert!(pair.in_sync());
}

#[test]
fn diverged_stacks_refuse_to_move() {
    let mut ahead = slots("w1", Position3D::default(), 1.0);
    ahead.next();
    let mut pair = SlotPair::new(ahead, slots("w2", Position3D::default(), -1.0));

    assert!(!pair.in_sync());
    assert_eq!(pair.issued(), None);
    assert!(matches!(pair.advance(), Err(AppError::Desync(_))));
    assert!(matches!(pair.retreat(), Err(AppError::Desync(_))));

    pair.reset();
    assert!(pair.in_sync());
    assert_eq!(pair.issued(), Some(0));
}

#[test]
fn reset_returns_both_to_base() {
    let mut pair = pair();
    pair.advance().unwrap();
    pair.advance().unwrap();
    pair.reset();
    let again = pair.advance().unwrap();
    for id in WorkerId::ALL {
        assert_eq!(again.for_worker(id), pair.stack(id).base());
    }
}

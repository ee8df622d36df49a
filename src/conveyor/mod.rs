//! Conveyor state machine and the task that drives the physical belt.
//!
//! [`ConveyorState`] is the shared, lock-protected record of the belt.
//! [`controller::ConveyorController`] runs one transit cycle at a time:
//! it chooses a direction from the boundary sensors, moves the belt,
//! slows it at the midpoint, stops it at the far end and releases it once
//! the picker has emptied it.

pub mod controller;
pub mod wait;

use crate::models::{ConveyorStatus, Direction};
use crate::{AppError, Result};

/// Snapshot of the belt.
///
/// `direction` is [`Direction::None`] whenever `status` is
/// [`ConveyorStatus::Ready`] or [`ConveyorStatus::Loading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConveyorState {
    status: ConveyorStatus,
    direction: Direction,
    items_on_belt: usize,
}

impl Default for ConveyorState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConveyorState {
    /// Idle, empty belt.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: ConveyorStatus::Ready,
            direction: Direction::None,
            items_on_belt: 0,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConveyorStatus {
        self.status
    }

    /// Current direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Items placed by the mover and not yet removed by the picker.
    #[must_use]
    pub const fn items_on_belt(&self) -> usize {
        self.items_on_belt
    }

    /// Whether `next` is a permitted successor of the current status.
    #[must_use]
    pub fn can_transition_to(&self, next: ConveyorStatus) -> bool {
        matches!(
            (self.status, next),
            (
                ConveyorStatus::Ready,
                ConveyorStatus::Moving | ConveyorStatus::Loading
            ) | (ConveyorStatus::Moving, ConveyorStatus::Unloading)
                | (
                    ConveyorStatus::Unloading | ConveyorStatus::Loading,
                    ConveyorStatus::Ready
                )
        )
    }

    /// Move to `next`, travelling in `direction` if the belt will move.
    ///
    /// Returns the previous status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the edge is not permitted or
    /// a transit is requested without a direction.
    pub fn transition(&mut self, next: ConveyorStatus, direction: Direction) -> Result<ConveyorStatus> {
        if !self.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "{:?} -> {next:?}",
                self.status
            )));
        }
        if next == ConveyorStatus::Moving && direction == Direction::None {
            return Err(AppError::InvalidTransition(
                "transit requires a direction".into(),
            ));
        }

        let previous = self.status;
        self.status = next;
        self.direction = match next {
            ConveyorStatus::Ready | ConveyorStatus::Loading => Direction::None,
            ConveyorStatus::Moving => direction,
            ConveyorStatus::Unloading => self.direction,
        };
        Ok(previous)
    }

    /// Return to `Ready` regardless of the current status.
    ///
    /// Only used when a cycle is abandoned on shutdown or fault.
    pub fn force_ready(&mut self) -> ConveyorStatus {
        let previous = self.status;
        self.status = ConveyorStatus::Ready;
        self.direction = Direction::None;
        previous
    }

    /// Count one more item placed on the belt.
    pub fn add_item(&mut self) {
        self.items_on_belt += 1;
    }

    /// Mark the belt empty.
    pub fn clear_items(&mut self) {
        self.items_on_belt = 0;
    }
}

//! Mirrored conveyor slot stacks.
//!
//! Both workers address the same physical belt positions, each in its own
//! frame. Advancing one view without the other would corrupt belt
//! addressing, so the pair is only mutated as a unit.

use tracing::warn;

use crate::geometry::Position3D;
use crate::models::WorkerId;
use crate::{AppError, Result};

use super::PlacementStack;

/// Belt slot positions for one index, per worker frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotPosition {
    positions: [Position3D; 2],
}

impl SlotPosition {
    /// The slot in `worker`'s frame.
    #[must_use]
    pub fn for_worker(&self, worker: WorkerId) -> Position3D {
        self.positions[worker.index()]
    }
}

/// The two workers' conveyor slot stacks.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPair {
    stacks: [PlacementStack; 2],
}

impl SlotPair {
    /// Pair worker1's and worker2's slot stacks.
    #[must_use]
    pub fn new(worker1: PlacementStack, worker2: PlacementStack) -> Self {
        Self {
            stacks: [worker1, worker2],
        }
    }

    /// Advance both stacks to the next belt slot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Desync` if the stacks disagree before advancing.
    pub fn advance(&mut self) -> Result<SlotPosition> {
        self.ensure_in_sync()?;
        let [first, second] = &mut self.stacks;
        Ok(SlotPosition {
            positions: [first.next(), second.next()],
        })
    }

    /// Take back the most recent belt slot from both stacks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Desync` if the stacks disagree, or
    /// `AppError::EmptyHistory` if no slot is issued.
    pub fn retreat(&mut self) -> Result<SlotPosition> {
        self.ensure_in_sync()?;
        let [first, second] = &mut self.stacks;
        Ok(SlotPosition {
            positions: [first.prev()?, second.prev()?],
        })
    }

    /// Reset both stacks to their base positions.
    pub fn reset(&mut self) {
        for stack in &mut self.stacks {
            stack.reset();
        }
    }

    /// Number of issued slots, if both views agree.
    #[must_use]
    pub fn issued(&self) -> Option<usize> {
        self.in_sync().then(|| self.stacks[0].len())
    }

    /// Whether both views describe the same belt state.
    #[must_use]
    pub fn in_sync(&self) -> bool {
        let [first, second] = &self.stacks;
        first.len() == second.len() && first.level() == second.level()
    }

    /// Read-only view of one worker's stack.
    #[must_use]
    pub fn stack(&self, worker: WorkerId) -> &PlacementStack {
        &self.stacks[worker.index()]
    }

    fn ensure_in_sync(&self) -> Result<()> {
        if self.in_sync() {
            return Ok(());
        }
        let [first, second] = &self.stacks;
        warn!(
            worker1_len = first.len(),
            worker2_len = second.len(),
            worker1_level = first.level(),
            worker2_level = second.level(),
            "conveyor slot stacks diverged"
        );
        Err(AppError::Desync(format!(
            "slot stacks diverged ({} vs {} issued)",
            first.len(),
            second.len()
        )))
    }
}

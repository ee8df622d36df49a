//! Deterministic stacking position generator.

use std::num::NonZeroUsize;

use tracing::debug;

use crate::geometry::{Position3D, Vec2};
use crate::{AppError, Result};

/// Gap left between neighbouring columns, in metres.
pub const COLUMN_PADDING: Vec2 = Vec2::new(0.01, 0.01);

/// Generator of stacking slots starting at a base point.
///
/// Slots fill vertically up to `level_count`, then the column shifts by
/// `footprint + padding` along the lateral direction and height restarts at
/// the base. Every issued position is kept so it can be taken back with
/// [`prev`](Self::prev).
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementStack {
    name: String,
    base: Position3D,
    cursor: Position3D,
    lateral_direction: Vec2,
    level_count: NonZeroUsize,
    current_level: usize,
    footprint: Position3D,
    history: Vec<Position3D>,
}

impl PlacementStack {
    /// Create a stack at `base` for objects of size `footprint`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base: Position3D,
        lateral_direction: Vec2,
        level_count: NonZeroUsize,
        footprint: Position3D,
    ) -> Self {
        Self {
            name: name.into(),
            base,
            cursor: base,
            lateral_direction,
            level_count,
            current_level: 0,
            footprint,
            history: Vec::new(),
        }
    }

    /// Issue the next free slot and advance.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Position3D {
        let issued = self.cursor;
        let levels = self.level_count.get();

        self.current_level = (self.current_level + 1) % levels;
        #[allow(clippy::cast_precision_loss)] // level counts are tiny
        let height = self.footprint.z * self.current_level as f64;
        self.cursor.z = self.base.z + height;

        if self.current_level == 0 {
            let step = (self.footprint.xy() + COLUMN_PADDING).scale(self.lateral_direction);
            self.cursor = self.cursor.offset_xy(step);
        }

        self.history.push(issued);
        debug!(stack = %self.name, ?issued, level = self.current_level, "slot issued");
        issued
    }

    /// Take back the most recently issued slot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::EmptyHistory` if nothing has been issued since the
    /// last reset.
    pub fn prev(&mut self) -> Result<Position3D> {
        let position = self
            .history
            .pop()
            .ok_or_else(|| AppError::EmptyHistory(format!("stack {} has no issued slots", self.name)))?;

        let levels = self.level_count.get();
        self.cursor = position;
        self.current_level = (self.current_level + levels - 1) % levels;
        Ok(position)
    }

    /// Restore the base position, level zero and an empty history.
    pub fn reset(&mut self) {
        self.cursor = self.base;
        self.current_level = 0;
        self.history.clear();
    }

    /// Most recently issued slot, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<Position3D> {
        self.history.last().copied()
    }

    /// Number of issued slots not yet taken back.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether no slot is currently issued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Level the next slot will be issued at.
    #[must_use]
    pub fn level(&self) -> usize {
        self.current_level
    }

    /// Original base position.
    #[must_use]
    pub fn base(&self) -> Position3D {
        self.base
    }

    /// Stack name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

//! Object kinds handled by the cell and their fixed geometry.

use serde::{Deserialize, Serialize};

use crate::geometry::Position3D;

/// The two object kinds the manipulators sort.
///
/// Geometry is carried by the kind itself so motion code never looks it up
/// at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// 50 mm cube.
    Cube,
    /// 60 mm x 75 mm cylinder.
    Cylinder,
}

impl ObjectKind {
    /// Approach offset above the object before descending.
    #[must_use]
    pub const fn over_offset(self) -> Position3D {
        match self {
            Self::Cube => Position3D::new(0.0, 0.0, 0.1),
            Self::Cylinder => Position3D::new(0.0, 0.0, 0.15),
        }
    }

    /// Grip offset relative to the object's reference point.
    #[must_use]
    pub const fn at_offset(self) -> Position3D {
        match self {
            Self::Cube => Position3D::new(0.0, 0.0, 0.01),
            Self::Cylinder => Position3D::new(0.0, 0.0, 0.025),
        }
    }

    /// Bounding size of the object.
    #[must_use]
    pub const fn footprint(self) -> Position3D {
        match self {
            Self::Cube => Position3D::new(0.05, 0.05, 0.05),
            Self::Cylinder => Position3D::new(0.06, 0.06, 0.075),
        }
    }

    /// Extra height when releasing onto the belt.
    #[must_use]
    pub const fn belt_place_offset(self) -> Position3D {
        match self {
            Self::Cube => Position3D::new(0.0, 0.0, 0.0),
            Self::Cylinder => Position3D::new(0.0, 0.0, 0.01),
        }
    }

    /// Correction applied when picking this kind off the belt.
    #[must_use]
    pub const fn belt_pick_offset(self) -> Position3D {
        match self {
            Self::Cube => Position3D::new(0.0, 0.0, 0.0),
            Self::Cylinder => Position3D::new(-0.04, 0.0, 0.0),
        }
    }

    /// The other kind.
    #[must_use]
    pub const fn complement(self) -> Self {
        match self {
            Self::Cube => Self::Cylinder,
            Self::Cylinder => Self::Cube,
        }
    }
}

/// A single classified object reported by the vision collaborator.
///
/// Consumed once per detection cycle; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectSighting {
    /// Classified kind.
    pub kind: ObjectKind,
    /// Position in the observing worker's frame. 2D results sit at z = 0.
    pub position: Position3D,
}

impl ObjectSighting {
    /// Construct a sighting.
    #[must_use]
    pub fn new(kind: ObjectKind, position: Position3D) -> Self {
        Self { kind, position }
    }
}

/// Per-cell work summary reported at every token decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Workload {
    /// Sightings that must cross the conveyor.
    pub moves: usize,
    /// Sightings that stay in the cell and only need stacking.
    pub stores: usize,
}

impl Workload {
    /// Count a detection from the point of view of a worker storing `stores`.
    #[must_use]
    pub fn tally(sightings: &[ObjectSighting], stores: ObjectKind) -> Self {
        let stores_count = sightings.iter().filter(|s| s.kind == stores).count();
        Self {
            moves: sightings.len() - stores_count,
            stores: stores_count,
        }
    }

    /// Combined workload.
    #[must_use]
    pub fn total(self) -> usize {
        self.moves + self.stores
    }
}

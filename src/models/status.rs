//! Identity and status enums for the workers and the conveyor.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// One of exactly two manipulators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerId {
    /// First manipulator; leader of every token decision.
    Worker1,
    /// Second manipulator.
    Worker2,
}

impl WorkerId {
    /// Both workers in index order.
    pub const ALL: [Self; 2] = [Self::Worker1, Self::Worker2];

    /// The peer worker.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Worker1 => Self::Worker2,
            Self::Worker2 => Self::Worker1,
        }
    }

    /// Stable array index (0 or 1).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Worker1 => 0,
            Self::Worker2 => 1,
        }
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker1 => f.write_str("worker1"),
            Self::Worker2 => f.write_str("worker2"),
        }
    }
}

/// Manipulator motion status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Not initialised yet, or terminated.
    NotReady,
    /// Idle between commands.
    Ready,
    /// A motion command is in flight.
    Moving,
}

/// Physical status of the belt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConveyorStatus {
    /// Idle, available for a new load or transit.
    Ready,
    /// Belt translating.
    Moving,
    /// Halted while the mover places items.
    Loading,
    /// Halted at the destination with items reachable by the picker.
    Unloading,
}

/// Belt travel direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Toward worker1's end.
    Left,
    /// Toward worker2's end.
    Right,
    /// Stationary.
    None,
}

impl Direction {
    /// The worker whose end of the belt this direction delivers to.
    #[must_use]
    pub const fn destination(self) -> Option<WorkerId> {
        match self {
            Self::Left => Some(WorkerId::Worker1),
            Self::Right => Some(WorkerId::Worker2),
            Self::None => None,
        }
    }

    /// Direction that carries items away from `loader`.
    #[must_use]
    pub const fn away_from(loader: WorkerId) -> Self {
        match loader {
            WorkerId::Worker1 => Self::Right,
            WorkerId::Worker2 => Self::Left,
        }
    }
}

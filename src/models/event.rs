//! Events published by the coordinator for logging and observation.

use uuid::Uuid;

use crate::geometry::Position3D;

use super::{ConveyorStatus, Direction, ObjectKind, WorkerId};

/// Notable state changes in the cell.
///
/// Published on a broadcast channel; slow receivers lose old events rather
/// than blocking publishers.
#[derive(Debug, Clone, PartialEq)]
pub enum CellEvent {
    /// The conveyor changed status.
    ConveyorTransition {
        /// Previous status.
        from: ConveyorStatus,
        /// New status.
        to: ConveyorStatus,
        /// Direction after the change.
        direction: Direction,
    },
    /// A token decision published a new mover.
    TokensAssigned {
        /// Worker authorised to load the belt, if any.
        mover: Option<WorkerId>,
    },
    /// The mover finished loading a batch.
    BatchLoaded {
        /// Loading worker.
        worker: WorkerId,
        /// Batch identifier.
        batch: Uuid,
        /// Items placed on the belt.
        count: usize,
    },
    /// The picker finished unloading a batch.
    BatchUnloaded {
        /// Unloading worker.
        worker: WorkerId,
        /// Batch identifier, if one was recorded.
        batch: Option<Uuid>,
        /// Items removed from the belt.
        count: usize,
    },
    /// A worker stacked an object in its own cell.
    ItemSorted {
        /// Sorting worker.
        worker: WorkerId,
        /// Object kind.
        kind: ObjectKind,
        /// Stack position used.
        position: Position3D,
    },
    /// Both cells reported no remaining work; placement stacks were reset.
    PassComplete,
    /// The slot stacks diverged and were forcibly reset.
    DesyncRecovered {
        /// Worker whose cycle was aborted.
        worker: WorkerId,
    },
    /// A worker terminated on a fault after releasing its tokens.
    WorkerFaulted {
        /// Faulted worker.
        worker: WorkerId,
        /// Fault description.
        reason: String,
    },
}

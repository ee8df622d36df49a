//! Domain model module declarations.

pub mod event;
pub mod object;
pub mod status;

pub use event::CellEvent;
pub use object::{ObjectKind, ObjectSighting, Workload};
pub use status::{ConveyorStatus, Direction, WorkerId, WorkerStatus};

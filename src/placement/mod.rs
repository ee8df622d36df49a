//! Position generators for stacked objects.
//!
//! [`PlacementStack`] tiles a cell with stacks of one object kind.
//! [`SlotPair`] holds the two per-worker views of the conveyor slots and
//! only ever moves them together.

pub mod slots;
pub mod stack;

pub use slots::SlotPair;
pub use stack::PlacementStack;

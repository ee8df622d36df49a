//! Coordination of the two workers and the conveyor.
//!
//! - [`coordinator`]: shared tokens, belt record and rendezvous.
//! - [`worker`]: the per-manipulator loop.
//! - [`runtime`]: start-up, task supervision and shutdown.
//! - [`events`]: structured logging of cell events.

pub mod coordinator;
pub mod events;
pub mod runtime;
pub mod worker;

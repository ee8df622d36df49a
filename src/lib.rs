#![forbid(unsafe_code)]

pub mod config;
pub mod conveyor;
pub mod driver;
pub mod errors;
pub mod geometry;
pub mod models;
pub mod orchestrator;
pub mod placement;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

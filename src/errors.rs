//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// A sensor that answers "out of range" is deliberately absent here: it is
/// reported as [`SensorReading::OutOfRange`](crate::driver::SensorReading)
/// and treated as "no object".
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// A collaborator could not be brought up before the run started.
    Startup(String),
    /// Manipulator controller rejected or could not complete a command.
    Motion(String),
    /// `prev()` was called on a position stack with no issued positions.
    EmptyHistory(String),
    /// The two mirrored conveyor slot stacks no longer agree.
    Desync(String),
    /// Conveyor status change outside the permitted transition table.
    InvalidTransition(String),
    /// Vision collaborator failure.
    Vision(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The run was cancelled while the operation was waiting.
    Shutdown(String),
}

impl AppError {
    /// Whether this error is the cancellation path rather than a fault.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Motion(msg) => write!(f, "motion: {msg}"),
            Self::EmptyHistory(msg) => write!(f, "empty history: {msg}"),
            Self::Desync(msg) => write!(f, "desync: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Vision(msg) => write!(f, "vision: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Shutdown(msg) => write!(f, "shutdown: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

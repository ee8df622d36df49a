//! Collaborator abstractions for motion, vision and distance sensing.
//!
//! The coordination core never talks to hardware directly. The traits in
//! this module are the seam: [`iolink`] provides the HTTP sensor gateway
//! used on the real rig and [`sim`] provides a complete simulated rig.

pub mod iolink;
pub mod sim;

use std::future::Future;
use std::pin::Pin;

use crate::geometry::Pose;
use crate::models::{ObjectSighting, WorkerId};
use crate::Result;

/// Boxed future returned by collaborator methods.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a single distance read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    /// Measured distance in sensor units.
    Distance(u16),
    /// No usable measurement; always treated as "no object".
    OutOfRange,
}

impl SensorReading {
    /// Whether an object is closer than `threshold`.
    #[must_use]
    pub fn is_object_present(self, threshold: u16) -> bool {
        match self {
            Self::Distance(distance) => distance < threshold,
            Self::OutOfRange => false,
        }
    }
}

/// Capability handle for one manipulator controller.
///
/// Every call blocks the calling task until the controller has completed
/// the command.
pub trait MotionClient: Send + Sync {
    /// Bring the controller and gripper to an operable state.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Startup`](crate::AppError::Startup) if the
    /// controller is unreachable.
    fn initialize(&self) -> DriverFuture<'_, Result<()>>;

    /// Joint move to `pose`, returning on arrival.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Motion`](crate::AppError::Motion) on controller fault.
    fn move_to(&self, pose: Pose) -> DriverFuture<'_, Result<()>>;

    /// Open the gripper.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Motion`](crate::AppError::Motion) on controller fault.
    fn open_gripper(&self) -> DriverFuture<'_, Result<()>>;

    /// Close the gripper.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Motion`](crate::AppError::Motion) on controller fault.
    fn close_gripper(&self) -> DriverFuture<'_, Result<()>>;

    /// Drive a digital output of the controller.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Motion`](crate::AppError::Motion) on controller fault.
    fn set_digital_output(&self, channel: u8, high: bool) -> DriverFuture<'_, Result<()>>;

    /// Drive an analog (voltage) output of the controller.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Motion`](crate::AppError::Motion) on controller fault.
    fn set_analog_output(&self, channel: u8, value: f64) -> DriverFuture<'_, Result<()>>;
}

/// Object detection for one cell. Treated as expensive.
pub trait VisionClient: Send + Sync {
    /// Detect the loose objects in `cell`, in that worker's frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Vision`](crate::AppError::Vision) if the camera
    /// could not be queried.
    fn detect(&self, cell: WorkerId) -> DriverFuture<'_, Result<Vec<ObjectSighting>>>;
}

/// Distance sensors along the belt.
///
/// Failures never surface as errors; they read as
/// [`SensorReading::OutOfRange`].
pub trait SensorGateway: Send + Sync {
    /// Read sensor `sensor` (IO-Link port number).
    fn read_distance(&self, sensor: u8) -> DriverFuture<'_, SensorReading>;
}

//! Global configuration parsing and validation.

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::geometry::{Pose, Position3D, Vec2};
use crate::models::{Direction, ObjectKind, ObjectSighting, WorkerId};
use crate::placement::PlacementStack;
use crate::{AppError, Result};

/// One direction of belt travel: which sensors gate it and how it stops.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LaneConfig {
    /// Sensor at the loading end; presence here starts a cycle.
    pub start_sensor: u8,
    /// Sensor just past the midpoint; presence here triggers the slow-down.
    pub mid_sensor: u8,
    /// Sensor at the delivery end; presence here stops the belt.
    pub end_sensor: u8,
    /// Digital output pulsed to run the belt in this direction.
    pub run_output: u8,
    /// Hold after the mid sensor fires, compensating mechanical overrun.
    pub settle_ms: u64,
    /// Hold after the end sensor fires before stopping.
    #[serde(default)]
    pub stop_delay_ms: u64,
}

impl LaneConfig {
    /// Settle duration after the mid sensor.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Delay between end detection and stop.
    #[must_use]
    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }
}

fn default_right_lane() -> LaneConfig {
    LaneConfig {
        start_sensor: 4,
        mid_sensor: 2,
        end_sensor: 1,
        run_output: 5,
        settle_ms: 3300,
        stop_delay_ms: 400,
    }
}

fn default_left_lane() -> LaneConfig {
    LaneConfig {
        start_sensor: 1,
        mid_sensor: 3,
        end_sensor: 4,
        run_output: 6,
        settle_ms: 3300,
        stop_delay_ms: 0,
    }
}

/// Conveyor actuation and sensing configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ConveyorConfig {
    /// Worker whose controller has the belt wired to its outputs.
    #[serde(default = "default_owner")]
    pub owner: WorkerId,
    /// Analog output value for transit.
    #[serde(default = "default_transit_speed")]
    pub transit_speed: f64,
    /// Analog output value for the final approach.
    #[serde(default = "default_creep_speed")]
    pub creep_speed: f64,
    /// Distance below which a sensor reports an object.
    #[serde(default = "default_presence_threshold")]
    pub presence_threshold: u16,
    /// Interval between sensor polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Length of run/stop output pulses.
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,
    /// Pause between detecting a loaded item and starting the belt.
    #[serde(default)]
    pub start_delay_ms: u64,
    /// Analog output channel driving the belt speed.
    #[serde(default = "default_speed_channel")]
    pub speed_channel: u8,
    /// Digital output pulsed to stop the belt.
    #[serde(default = "default_stop_output")]
    pub stop_output: u8,
    /// Travel toward worker2.
    #[serde(default = "default_right_lane")]
    pub right: LaneConfig,
    /// Travel toward worker1.
    #[serde(default = "default_left_lane")]
    pub left: LaneConfig,
}

fn default_owner() -> WorkerId {
    WorkerId::Worker2
}

fn default_transit_speed() -> f64 {
    0.10
}

fn default_creep_speed() -> f64 {
    0.025
}

fn default_presence_threshold() -> u16 {
    50
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_pulse_ms() -> u64 {
    100
}

fn default_speed_channel() -> u8 {
    1
}

fn default_stop_output() -> u8 {
    7
}

impl ConveyorConfig {
    /// Lane used for `direction`, if the belt moves at all.
    #[must_use]
    pub fn lane(&self, direction: Direction) -> Option<&LaneConfig> {
        match direction {
            Direction::Right => Some(&self.right),
            Direction::Left => Some(&self.left),
            Direction::None => None,
        }
    }

    /// Interval between sensor polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Length of output pulses.
    #[must_use]
    pub fn pulse(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }

    /// Pause before starting a detected load.
    #[must_use]
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

/// Token and batching policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HandoffConfig {
    /// Maximum items loaded per conveyor cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// First idle back-off delay before re-polling vision.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Upper bound of the idle back-off.
    #[serde(default = "default_max_idle_backoff_ms")]
    pub max_idle_backoff_ms: u64,
    /// Poll interval while the picker waits for the belt.
    #[serde(default = "default_stage_poll_ms")]
    pub stage_poll_ms: u64,
}

fn default_batch_size() -> usize {
    5
}

fn default_idle_backoff_ms() -> u64 {
    1000
}

fn default_max_idle_backoff_ms() -> u64 {
    8000
}

fn default_stage_poll_ms() -> u64 {
    200
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            idle_backoff_ms: default_idle_backoff_ms(),
            max_idle_backoff_ms: default_max_idle_backoff_ms(),
            stage_poll_ms: default_stage_poll_ms(),
        }
    }
}

/// Fixed pauses around gripper and motion commands.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MotionConfig {
    /// Hold after closing the gripper.
    #[serde(default = "default_grip_settle_ms")]
    pub grip_settle_ms: u64,
    /// Hold after opening the gripper.
    #[serde(default = "default_release_settle_ms")]
    pub release_settle_ms: u64,
    /// Pause after each completed move.
    #[serde(default = "default_post_move_ms")]
    pub post_move_ms: u64,
}

fn default_grip_settle_ms() -> u64 {
    600
}

fn default_release_settle_ms() -> u64 {
    200
}

fn default_post_move_ms() -> u64 {
    100
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            grip_settle_ms: default_grip_settle_ms(),
            release_settle_ms: default_release_settle_ms(),
            post_move_ms: default_post_move_ms(),
        }
    }
}

/// Origin, direction and height of a position stack.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StackConfig {
    /// First slot.
    pub base: Position3D,
    /// Direction in which columns advance.
    pub direction: Vec2,
    /// Objects per column.
    #[serde(default = "default_levels")]
    pub levels: usize,
}

fn default_levels() -> usize {
    1
}

impl StackConfig {
    /// Build a stack for objects of `kind`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `levels` is zero.
    pub fn build(&self, name: impl Into<String>, kind: ObjectKind) -> Result<PlacementStack> {
        let name = name.into();
        let levels = NonZeroUsize::new(self.levels)
            .ok_or_else(|| AppError::Config(format!("{name}: levels must be greater than zero")))?;
        Ok(PlacementStack::new(
            name,
            self.base,
            self.direction,
            levels,
            kind.footprint(),
        ))
    }
}

/// Per-manipulator configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Controller address.
    pub host: String,
    /// Kind this worker keeps; the complement is handed across.
    pub stores: ObjectKind,
    /// Safe pose between tasks.
    pub idle_pose: Pose,
    /// Reference pose at this worker's end of the belt.
    pub conveyor_pose: Pose,
    /// Where sorted objects are stacked in the cell.
    pub placement: StackConfig,
    /// Where items are put on (and taken off) the belt.
    pub slots: StackConfig,
}

/// Sensor gateway endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SensorGatewayConfig {
    /// Base URL of the IO-Link master.
    pub url: String,
    /// Per-request timeout.
    #[serde(default = "default_sensor_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sensor_timeout_ms() -> u64 {
    500
}

/// Initial contents and pacing of the simulated rig.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub struct SimulationConfig {
    /// Loose objects in worker1's cell.
    #[serde(default)]
    pub worker1: Vec<ObjectSighting>,
    /// Loose objects in worker2's cell.
    #[serde(default)]
    pub worker2: Vec<ObjectSighting>,
    /// Simulated duration of every motion command.
    #[serde(default = "default_sim_motion_ms")]
    pub motion_ms: u64,
}

fn default_sim_motion_ms() -> u64 {
    5
}

/// Global configuration parsed from `cell-handoff.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Belt actuation and sensing.
    pub conveyor: ConveyorConfig,
    /// Token and batching policy.
    #[serde(default)]
    pub handoff: HandoffConfig,
    /// Gripper and move pauses.
    #[serde(default)]
    pub motion: MotionConfig,
    /// First manipulator.
    pub worker1: WorkerConfig,
    /// Second manipulator.
    pub worker2: WorkerConfig,
    /// IO-Link master; when absent the simulated sensors are used.
    pub sensor_gateway: Option<SensorGatewayConfig>,
    /// Simulated rig contents.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration of one worker.
    #[must_use]
    pub fn worker(&self, id: WorkerId) -> &WorkerConfig {
        match id {
            WorkerId::Worker1 => &self.worker1,
            WorkerId::Worker2 => &self.worker2,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker1.stores == self.worker2.stores {
            return Err(AppError::Config(
                "worker1 and worker2 must store different object kinds".into(),
            ));
        }

        for id in WorkerId::ALL {
            let worker = self.worker(id);
            if worker.placement.levels == 0 || worker.slots.levels == 0 {
                return Err(AppError::Config(format!(
                    "{id}: stack levels must be greater than zero"
                )));
            }
        }

        if self.handoff.batch_size == 0 {
            return Err(AppError::Config("batch_size must be greater than zero".into()));
        }

        if self.handoff.idle_backoff_ms == 0 || self.handoff.stage_poll_ms == 0 {
            return Err(AppError::Config(
                "idle_backoff_ms and stage_poll_ms must be greater than zero".into(),
            ));
        }

        if self.handoff.max_idle_backoff_ms < self.handoff.idle_backoff_ms {
            return Err(AppError::Config(
                "max_idle_backoff_ms must not be below idle_backoff_ms".into(),
            ));
        }

        if self.conveyor.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.conveyor.creep_speed > self.conveyor.transit_speed {
            return Err(AppError::Config(
                "creep_speed must not exceed transit_speed".into(),
            ));
        }

        for (name, lane) in [("right", &self.conveyor.right), ("left", &self.conveyor.left)] {
            if lane.start_sensor == lane.end_sensor || lane.mid_sensor == lane.end_sensor {
                return Err(AppError::Config(format!(
                    "{name} lane sensors must be distinct"
                )));
            }
        }

        Ok(())
    }
}

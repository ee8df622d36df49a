//! Simulated rig: two manipulators, two cells and one belt in one world.
//!
//! Motion, vision and sensors all act on the same [`SimWorld`], so a load
//! performed through [`SimMotion`] becomes visible to [`SimSensors`] and a
//! pick through one arm removes the object [`SimVision`] reports.
//!
//! The belt advances one step per sensor read while it runs. The mid
//! sensor of the active lane fires from [`MID_STEP`], the end sensor from
//! [`END_STEP`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::{GlobalConfig, LaneConfig};
use crate::geometry::{Pose, Position3D};
use crate::models::{Direction, ObjectKind, ObjectSighting, WorkerId};
use crate::orchestrator::runtime::Collaborators;
use crate::{AppError, Result};

use super::{DriverFuture, MotionClient, SensorGateway, SensorReading, VisionClient};

/// Belt progress at which the mid sensor fires.
pub const MID_STEP: u32 = 3;
/// Belt progress at which the end sensor fires.
pub const END_STEP: u32 = 6;
/// Planar radius around a conveyor pose inside which the gripper acts on the belt.
pub const BELT_REACH: f64 = 0.4;
/// Planar tolerance for gripping a loose object.
pub const GRIP_TOLERANCE: f64 = 0.03;

const PRESENT: SensorReading = SensorReading::Distance(20);
const ABSENT: SensorReading = SensorReading::Distance(200);

/// Fixed geometry and wiring of the simulated rig.
#[derive(Debug, Clone)]
pub struct SimLayout {
    /// Conveyor reference pose per worker.
    pub conveyor_poses: [Position3D; 2],
    /// Worker whose outputs drive the belt.
    pub owner: WorkerId,
    /// Lane toward worker2.
    pub right: LaneConfig,
    /// Lane toward worker1.
    pub left: LaneConfig,
    /// Stop output.
    pub stop_output: u8,
    /// Duration of every motion command.
    pub motion_time: Duration,
}

impl SimLayout {
    /// Layout matching `config`.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            conveyor_poses: [
                config.worker1.conveyor_pose.position(),
                config.worker2.conveyor_pose.position(),
            ],
            owner: config.conveyor.owner,
            right: config.conveyor.right.clone(),
            left: config.conveyor.left.clone(),
            stop_output: config.conveyor.stop_output,
            motion_time: Duration::from_millis(config.simulation.motion_ms),
        }
    }

    fn lane(&self, direction: Direction) -> Option<&LaneConfig> {
        match direction {
            Direction::Right => Some(&self.right),
            Direction::Left => Some(&self.left),
            Direction::None => None,
        }
    }

    /// Whether `sensor` sits at `worker`'s end of the belt.
    fn sensor_at_end(&self, sensor: u8, worker: WorkerId) -> bool {
        let arriving = Direction::away_from(worker.other());
        let departing = Direction::away_from(worker);
        self.lane(arriving).is_some_and(|lane| lane.end_sensor == sensor)
            || self.lane(departing).is_some_and(|lane| lane.start_sensor == sensor)
    }
}

#[derive(Debug, Default)]
struct Belt {
    items: Vec<ObjectKind>,
    end: Option<WorkerId>,
    running: Option<Direction>,
    progress: u32,
}

#[derive(Debug, Default)]
struct Arm {
    pose: Option<Pose>,
    held: Option<ObjectKind>,
    moves: usize,
    fail_after: Option<usize>,
    fail_initialize: bool,
}

/// Everything the simulated rig knows.
#[derive(Debug, Default)]
struct SimWorld {
    loose: [Vec<ObjectSighting>; 2],
    placed: [Vec<ObjectSighting>; 2],
    belt: Belt,
    arms: [Arm; 2],
    digital: Vec<(u8, bool)>,
    analog: Vec<(u8, f64)>,
    sensors_dead: bool,
}

/// Shared handle to the simulated world.
#[derive(Clone)]
pub struct SimRig {
    layout: Arc<SimLayout>,
    world: Arc<Mutex<SimWorld>>,
}

impl SimRig {
    /// Rig with the given loose objects in each cell.
    #[must_use]
    pub fn new(layout: SimLayout, worker1: Vec<ObjectSighting>, worker2: Vec<ObjectSighting>) -> Self {
        let world = SimWorld {
            loose: [worker1, worker2],
            ..SimWorld::default()
        };
        Self {
            layout: Arc::new(layout),
            world: Arc::new(Mutex::new(world)),
        }
    }

    /// Rig built from the `[simulation]` section of `config`.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            SimLayout::from_config(config),
            config.simulation.worker1.clone(),
            config.simulation.worker2.clone(),
        )
    }

    fn world(&self) -> MutexGuard<'_, SimWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Motion client for one arm.
    #[must_use]
    pub fn motion(&self, arm: WorkerId) -> Arc<SimMotion> {
        Arc::new(SimMotion {
            rig: self.clone(),
            arm,
        })
    }

    /// Vision over both cells.
    #[must_use]
    pub fn vision(&self) -> Arc<SimVision> {
        Arc::new(SimVision { rig: self.clone() })
    }

    /// Belt sensors.
    #[must_use]
    pub fn sensors(&self) -> Arc<SimSensors> {
        Arc::new(SimSensors { rig: self.clone() })
    }

    /// All collaborators backed by this rig.
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            motion: [self.motion(WorkerId::Worker1), self.motion(WorkerId::Worker2)],
            vision: self.vision(),
            sensors: self.sensors(),
        }
    }

    // ── Fault injection ─────────────────────────────────

    /// Fail every move of `arm` after `moves` successful ones.
    pub fn fail_motion_after(&self, arm: WorkerId, moves: usize) {
        self.world().arms[arm.index()].fail_after = Some(moves);
    }

    /// Make `arm` fail initialisation.
    pub fn fail_initialize(&self, arm: WorkerId) {
        self.world().arms[arm.index()].fail_initialize = true;
    }

    /// Make every sensor read out of range.
    pub fn set_sensors_dead(&self, dead: bool) {
        self.world().sensors_dead = dead;
    }

    // ── Inspection ──────────────────────────────────────

    /// Loose objects still in `cell`.
    #[must_use]
    pub fn loose(&self, cell: WorkerId) -> Vec<ObjectSighting> {
        self.world().loose[cell.index()].clone()
    }

    /// Objects released in `cell`, in order.
    #[must_use]
    pub fn placed(&self, cell: WorkerId) -> Vec<ObjectSighting> {
        self.world().placed[cell.index()].clone()
    }

    /// Items on the belt.
    #[must_use]
    pub fn belt_items(&self) -> usize {
        self.world().belt.items.len()
    }

    /// Whether the belt is running.
    #[must_use]
    pub fn belt_running(&self) -> bool {
        self.world().belt.running.is_some()
    }

    /// Digital output writes, in order.
    #[must_use]
    pub fn digital_log(&self) -> Vec<(u8, bool)> {
        self.world().digital.clone()
    }

    /// Analog output writes, in order.
    #[must_use]
    pub fn analog_log(&self) -> Vec<(u8, f64)> {
        self.world().analog.clone()
    }

    /// Completed moves of `arm`.
    #[must_use]
    pub fn moves(&self, arm: WorkerId) -> usize {
        self.world().arms[arm.index()].moves
    }
}

impl SimWorld {
    fn near_belt(&self, layout: &SimLayout, arm: WorkerId) -> bool {
        self.arms[arm.index()].pose.is_some_and(|pose| {
            pose.position()
                .planar_distance(layout.conveyor_poses[arm.index()])
                <= BELT_REACH
        })
    }

    fn grip(&mut self, layout: &SimLayout, arm: WorkerId) {
        let Some(pose) = self.arms[arm.index()].pose else {
            return;
        };
        let held = if self.near_belt(layout, arm) {
            let item = self.belt.items.pop();
            if self.belt.items.is_empty() {
                self.belt.end = None;
            }
            item
        } else {
            let cell = &mut self.loose[arm.index()];
            cell.iter()
                .position(|s| s.position.planar_distance(pose.position()) <= GRIP_TOLERANCE)
                .map(|index| cell.remove(index).kind)
        };
        trace!(%arm, ?held, "sim gripper closed");
        self.arms[arm.index()].held = held;
    }

    fn release(&mut self, layout: &SimLayout, arm: WorkerId) {
        let Some(kind) = self.arms[arm.index()].held.take() else {
            return;
        };
        let Some(pose) = self.arms[arm.index()].pose else {
            return;
        };
        if self.near_belt(layout, arm) {
            self.belt.items.push(kind);
            self.belt.end = Some(arm);
        } else {
            let position = pose.position() - kind.at_offset();
            self.placed[arm.index()].push(ObjectSighting::new(kind, position));
        }
        trace!(%arm, ?kind, "sim gripper opened");
    }

    fn output(&mut self, layout: &SimLayout, channel: u8, high: bool) {
        self.digital.push((channel, high));
        if !high {
            return;
        }
        if channel == layout.stop_output {
            if self.belt.running.take().is_some() {
                debug!(progress = self.belt.progress, "sim belt stopped");
            }
            return;
        }
        for direction in [Direction::Right, Direction::Left] {
            if layout.lane(direction).is_some_and(|lane| lane.run_output == channel) {
                self.belt.running = Some(direction);
                self.belt.progress = 0;
                debug!(?direction, "sim belt started");
            }
        }
    }

    fn read(&mut self, layout: &SimLayout, sensor: u8) -> SensorReading {
        if self.sensors_dead {
            return SensorReading::OutOfRange;
        }
        if self.belt.items.is_empty() {
            return ABSENT;
        }

        let Some(direction) = self.belt.running else {
            return match self.belt.end {
                Some(end) if layout.sensor_at_end(sensor, end) => PRESENT,
                _ => ABSENT,
            };
        };

        self.belt.progress += 1;
        let Some(lane) = layout.lane(direction) else {
            return ABSENT;
        };
        if self.belt.progress >= END_STEP {
            self.belt.end = direction.destination();
        } else {
            self.belt.end = None;
        }

        let present = (sensor == lane.mid_sensor && self.belt.progress >= MID_STEP)
            || (sensor == lane.end_sensor && self.belt.progress >= END_STEP);
        if present {
            PRESENT
        } else {
            ABSENT
        }
    }
}

/// Simulated manipulator controller.
pub struct SimMotion {
    rig: SimRig,
    arm: WorkerId,
}

impl SimMotion {
    async fn perform(&self, op: impl FnOnce(&mut SimWorld, &SimLayout) -> Result<()> + Send) -> Result<()> {
        tokio::time::sleep(self.rig.layout.motion_time).await;
        let mut world = self.rig.world();
        op(&mut world, &self.rig.layout)
    }
}

impl MotionClient for SimMotion {
    fn initialize(&self) -> DriverFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.rig.world().arms[self.arm.index()].fail_initialize {
                return Err(AppError::Startup(format!("{} unreachable", self.arm)));
            }
            Ok(())
        })
    }

    fn move_to(&self, pose: Pose) -> DriverFuture<'_, Result<()>> {
        let arm = self.arm;
        Box::pin(self.perform(move |world, _| {
            let state = &mut world.arms[arm.index()];
            if state.fail_after.is_some_and(|limit| state.moves >= limit) {
                return Err(AppError::Motion(format!("{arm} protective stop")));
            }
            state.pose = Some(pose);
            state.moves += 1;
            Ok(())
        }))
    }

    fn open_gripper(&self) -> DriverFuture<'_, Result<()>> {
        let arm = self.arm;
        Box::pin(self.perform(move |world, layout| {
            world.release(layout, arm);
            Ok(())
        }))
    }

    fn close_gripper(&self) -> DriverFuture<'_, Result<()>> {
        let arm = self.arm;
        Box::pin(self.perform(move |world, layout| {
            world.grip(layout, arm);
            Ok(())
        }))
    }

    fn set_digital_output(&self, channel: u8, high: bool) -> DriverFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut world = self.rig.world();
            world.output(&self.rig.layout, channel, high);
            Ok(())
        })
    }

    fn set_analog_output(&self, channel: u8, value: f64) -> DriverFuture<'_, Result<()>> {
        Box::pin(async move {
            self.rig.world().analog.push((channel, value));
            Ok(())
        })
    }
}

/// Simulated camera over both cells.
pub struct SimVision {
    rig: SimRig,
}

impl VisionClient for SimVision {
    fn detect(&self, cell: WorkerId) -> DriverFuture<'_, Result<Vec<ObjectSighting>>> {
        Box::pin(async move { Ok(self.rig.loose(cell)) })
    }
}

/// Simulated distance sensors along the belt.
pub struct SimSensors {
    rig: SimRig,
}

impl SensorGateway for SimSensors {
    fn read_distance(&self, sensor: u8) -> DriverFuture<'_, SensorReading> {
        Box::pin(async move {
            let mut world = self.rig.world();
            world.read(&self.rig.layout, sensor)
        })
    }
}

//! Conveyor cycle task.
//!
//! One cycle at a time: wait for an item at either loading end, carry it to
//! the far end, hold the belt while the picker empties it, then release.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ConveyorConfig;
use crate::driver::{MotionClient, SensorGateway};
use crate::models::{ConveyorStatus, Direction};
use crate::orchestrator::coordinator::Coordinator;
use crate::{AppError, Result};

use super::wait::{poll_until, sleep_or_cancel, wait_for_sensor};

/// Belt outputs, wired through the owning worker's controller.
///
/// Every command holds that worker's motion lock so belt actuation never
/// interleaves with one of its own motion commands.
pub struct BeltActuator {
    motion: Arc<dyn MotionClient>,
    motion_lock: Arc<Mutex<()>>,
    speed_channel: u8,
    pulse: Duration,
}

impl BeltActuator {
    /// Actuator driving the belt through `motion`.
    #[must_use]
    pub fn new(
        motion: Arc<dyn MotionClient>,
        motion_lock: Arc<Mutex<()>>,
        speed_channel: u8,
        pulse: Duration,
    ) -> Self {
        Self {
            motion,
            motion_lock,
            speed_channel,
            pulse,
        }
    }

    /// Pulse a digital output high, then low.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Motion` if the controller rejects either edge.
    pub async fn pulse(&self, channel: u8) -> Result<()> {
        let _guard = self.motion_lock.lock().await;
        self.motion.set_digital_output(channel, true).await?;
        tokio::time::sleep(self.pulse).await;
        self.motion.set_digital_output(channel, false).await
    }

    /// Set the belt speed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Motion` if the controller rejects the command.
    pub async fn set_speed(&self, value: f64) -> Result<()> {
        let _guard = self.motion_lock.lock().await;
        self.motion.set_analog_output(self.speed_channel, value).await
    }
}

/// Long-lived task running conveyor cycles.
pub struct ConveyorController {
    config: ConveyorConfig,
    coordinator: Arc<Coordinator>,
    sensors: Arc<dyn SensorGateway>,
    actuator: BeltActuator,
}

impl ConveyorController {
    /// Build the controller.
    #[must_use]
    pub fn new(
        config: ConveyorConfig,
        coordinator: Arc<Coordinator>,
        sensors: Arc<dyn SensorGateway>,
        actuator: BeltActuator,
    ) -> Self {
        Self {
            config,
            coordinator,
            sensors,
            actuator,
        }
    }

    /// Spawn the cycle loop.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(
            async move { self.run(cancel).await }.instrument(info_span!("conveyor")),
        )
    }

    /// Run cycles until `cancel` fires or the belt cannot be actuated.
    pub async fn run(self, cancel: CancellationToken) {
        info!("conveyor controller started");
        loop {
            let direction = match self.wait_for_load(&cancel).await {
                Ok(direction) => direction,
                Err(err) => {
                    debug!(%err, "conveyor idle wait ended");
                    break;
                }
            };

            if !self.config.start_delay().is_zero()
                && sleep_or_cancel(self.config.start_delay(), &cancel).await.is_err()
            {
                break;
            }

            match self.coordinator.begin_transit(direction).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    error!(%err, "conveyor refused transit");
                    continue;
                }
            }

            match self.run_cycle(direction, &cancel).await {
                Ok(()) => {}
                Err(err) if err.is_shutdown() => {
                    self.abort_cycle().await;
                    break;
                }
                Err(err @ AppError::Motion(_)) => {
                    error!(%err, "belt actuation failed, conveyor stopping");
                    self.abort_cycle().await;
                    break;
                }
                Err(err) => {
                    error!(%err, "conveyor cycle failed");
                    self.abort_cycle().await;
                }
            }
        }
        info!("conveyor controller stopped");
    }

    /// Poll the loading ends until an item waits on an idle belt.
    ///
    /// The right lane is checked first on every poll.
    async fn wait_for_load(&self, cancel: &CancellationToken) -> Result<Direction> {
        let threshold = self.config.presence_threshold;
        loop {
            if self.coordinator.conveyor().await.status() == ConveyorStatus::Ready {
                for direction in [Direction::Right, Direction::Left] {
                    let Some(lane) = self.config.lane(direction) else {
                        continue;
                    };
                    let reading = self.sensors.read_distance(lane.start_sensor).await;
                    if reading.is_object_present(threshold) {
                        debug!(?direction, sensor = lane.start_sensor, "item detected at loading end");
                        return Ok(direction);
                    }
                }
            }
            sleep_or_cancel(self.config.poll_interval(), cancel).await?;
        }
    }

    async fn run_cycle(&self, direction: Direction, cancel: &CancellationToken) -> Result<()> {
        let lane = self
            .config
            .lane(direction)
            .ok_or_else(|| AppError::InvalidTransition("transit requires a direction".into()))?;
        let threshold = self.config.presence_threshold;
        let interval = self.config.poll_interval();
        let sensors = self.sensors.as_ref();
        info!(?direction, "conveyor cycle started");

        self.actuator.set_speed(self.config.transit_speed).await?;
        self.actuator.pulse(lane.run_output).await?;

        wait_for_sensor(sensors, lane.mid_sensor, threshold, true, interval, cancel).await?;
        sleep_or_cancel(lane.settle(), cancel).await?;
        self.actuator.set_speed(self.config.creep_speed).await?;

        wait_for_sensor(sensors, lane.end_sensor, threshold, true, interval, cancel).await?;
        sleep_or_cancel(lane.stop_delay(), cancel).await?;
        self.actuator.pulse(self.config.stop_output).await?;
        self.coordinator.arrive().await?;

        wait_for_sensor(sensors, lane.end_sensor, threshold, false, interval, cancel).await?;
        let coordinator = &self.coordinator;
        poll_until("empty belt", interval, cancel, move || async move {
            coordinator.conveyor().await.items_on_belt() == 0
        })
        .await?;

        self.coordinator.release_belt().await?;
        info!(?direction, "conveyor cycle finished");
        Ok(())
    }

    async fn abort_cycle(&self) {
        if self.coordinator.conveyor().await.status() == ConveyorStatus::Ready {
            return;
        }
        if let Err(err) = self.actuator.pulse(self.config.stop_output).await {
            warn!(%err, "failed to stop belt while abandoning cycle");
        }
        self.coordinator.abandon_cycle().await;
    }
}

//! Per-manipulator loop.
//!
//! A worker sorts its own cell, loads the belt while it holds the move
//! token, unloads it while it holds the pickup token and otherwise meets
//! its peer to rebalance the tokens.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{HandoffConfig, MotionConfig, WorkerConfig};
use crate::conveyor::wait::sleep_or_cancel;
use crate::driver::{DriverFuture, MotionClient, VisionClient};
use crate::geometry::{Pose, Position3D};
use crate::models::{
    CellEvent, ConveyorStatus, ObjectKind, ObjectSighting, WorkerId, WorkerStatus, Workload,
};
use crate::placement::PlacementStack;
use crate::{AppError, Result};

use super::coordinator::{Coordinator, Snapshot, WorkerStatusCell};

/// Offset from the conveyor reference pose to the approach point.
pub const CONVEYOR_APPROACH: Position3D = Position3D::new(0.0, 0.1, 0.1);

/// Doubling delay between idle vision polls.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    /// Start at `base`, never exceeding `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait now; the following one doubles.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Handles a worker needs from the outside world.
pub struct WorkerHandles {
    /// Controller of this manipulator.
    pub motion: Arc<dyn MotionClient>,
    /// Lock serialising commands to that controller.
    pub motion_lock: Arc<Mutex<()>>,
    /// Shared vision collaborator.
    pub vision: Arc<dyn VisionClient>,
    /// Shared coordination state.
    pub coordinator: Arc<Coordinator>,
}

/// One manipulator and its cell.
pub struct ManipulatorWorker {
    id: WorkerId,
    config: WorkerConfig,
    handoff: HandoffConfig,
    timing: MotionConfig,
    motion: Arc<dyn MotionClient>,
    motion_lock: Arc<Mutex<()>>,
    vision: Arc<dyn VisionClient>,
    coordinator: Arc<Coordinator>,
    status: Arc<WorkerStatusCell>,
    placement: PlacementStack,
    backoff: IdleBackoff,
    staged: bool,
}

impl ManipulatorWorker {
    /// Build a worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the placement stack is invalid.
    pub fn new(
        id: WorkerId,
        config: WorkerConfig,
        handoff: HandoffConfig,
        timing: MotionConfig,
        handles: WorkerHandles,
    ) -> Result<Self> {
        let placement = config.placement.build(format!("{id}-placement"), config.stores)?;
        let backoff = IdleBackoff::new(
            Duration::from_millis(handoff.idle_backoff_ms),
            Duration::from_millis(handoff.max_idle_backoff_ms),
        );
        let status = handles.coordinator.status_cell(id);
        Ok(Self {
            id,
            config,
            handoff,
            timing,
            motion: handles.motion,
            motion_lock: handles.motion_lock,
            vision: handles.vision,
            coordinator: handles.coordinator,
            status,
            placement,
            backoff,
            staged: false,
        })
    }

    /// Kind handed across the belt by this worker.
    fn moves_kind(&self) -> ObjectKind {
        self.config.stores.complement()
    }

    /// Spawn the worker loop.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let span = info_span!("worker", worker = %self.id);
        tokio::spawn(async move { self.run(cancel).await }.instrument(span))
    }

    /// Run until shutdown or a fatal fault.
    pub async fn run(mut self, cancel: CancellationToken) {
        match self.drive(&cancel).await {
            Ok(()) => info!("worker stopped"),
            Err(err) if err.is_shutdown() => {
                self.coordinator.release(self.id).await;
                info!("worker stopped on shutdown");
            }
            Err(err) => {
                error!(%err, "worker faulted");
                self.coordinator.fault(self.id, &err).await;
            }
        }
        self.status.store(WorkerStatus::NotReady);
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<()> {
        {
            let _moving = self.status.moving();
            self.command(|m| m.move_to(self.config.idle_pose)).await?;
        }
        info!("worker at idle pose");

        let sightings = self.detect().await;
        let workload = Workload::tally(&sightings, self.config.stores);
        if let Some(decision) = self.coordinator.rendezvous(self.id, workload, cancel).await? {
            debug!(mover = ?decision.mover, "pre-run decision");
        }

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Shutdown("worker loop cancelled".into()));
            }
            self.step(cancel).await?;
        }
    }

    /// One pass of the loop.
    async fn step(&mut self, cancel: &CancellationToken) -> Result<()> {
        let snapshot = self.coordinator.snapshot().await;
        let tokens = snapshot.tokens;
        let belt = snapshot.conveyor;

        if tokens.picker == Some(self.id) {
            if belt.status() == ConveyorStatus::Unloading {
                self.unload_batch().await?;
            } else {
                self.stage().await?;
                sleep_or_cancel(self.stage_poll(), cancel).await?;
            }
            return Ok(());
        }

        if tokens.mover == Some(self.id)
            && belt.status() == ConveyorStatus::Ready
            && belt.items_on_belt() == 0
        {
            return self.load_batch().await;
        }

        let sightings = self.detect().await;
        let workload = Workload::tally(&sightings, self.config.stores);

        if belt.status() != ConveyorStatus::Moving {
            if let Some(target) = sightings.iter().find(|s| s.kind == self.config.stores) {
                self.sort(*target).await?;
                self.backoff.reset();
                return Ok(());
            }
        }

        let engaged = !tokens.is_idle()
            || belt.status() != ConveyorStatus::Ready
            || belt.items_on_belt() > 0;
        if engaged || workload.stores > 0 {
            return self.wait_engaged(snapshot, cancel).await;
        }

        match self.coordinator.rebalance(self.id, workload, cancel).await? {
            Some(decision) => {
                if decision.pass_complete {
                    self.placement.reset();
                    info!(stack = self.placement.name(), "placement stack reset after pass");
                }
                if decision.mover.is_some() {
                    self.backoff.reset();
                    return Ok(());
                }
            }
            None => debug!("re-balance unavailable"),
        }

        let delay = self.backoff.next_delay();
        debug!(?delay, "idle");
        sleep_or_cancel(delay, cancel).await
    }

    /// Wait for the tokens or the belt status to change, for at most one
    /// back-off delay. Only the coordinator is polled, never vision.
    async fn wait_engaged(&mut self, seen: Snapshot, cancel: &CancellationToken) -> Result<()> {
        let limit = self.backoff.next_delay();
        let poll = self.stage_poll().min(limit);
        let started = Instant::now();
        while started.elapsed() < limit {
            sleep_or_cancel(poll, cancel).await?;
            let now = self.coordinator.snapshot().await;
            if now.tokens != seen.tokens || now.conveyor.status() != seen.conveyor.status() {
                break;
            }
        }
        Ok(())
    }

    fn stage_poll(&self) -> Duration {
        Duration::from_millis(self.handoff.stage_poll_ms)
    }

    async fn detect(&self) -> Vec<ObjectSighting> {
        match self.vision.detect(self.id).await {
            Ok(sightings) => sightings,
            Err(err) => {
                warn!(%err, "vision failed, treating cell as empty");
                Vec::new()
            }
        }
    }

    // ── Token work ──────────────────────────────────────

    async fn load_batch(&mut self) -> Result<()> {
        let moves_kind = self.moves_kind();
        let batch: Vec<ObjectSighting> = self
            .detect()
            .await
            .into_iter()
            .filter(|s| s.kind == moves_kind)
            .take(self.handoff.batch_size)
            .collect();

        if batch.is_empty() {
            self.coordinator.relinquish_move(self.id).await;
            return Ok(());
        }
        if !self.coordinator.begin_loading(self.id).await? {
            return Ok(());
        }

        info!(count = batch.len(), kind = ?moves_kind, "loading belt");
        for sighting in batch {
            let slot = match self.coordinator.advance_slot(self.id).await {
                Ok(slot) => slot,
                Err(err @ AppError::Desync(_)) => {
                    warn!(%err, "load aborted");
                    break;
                }
                Err(err) => return Err(err),
            };
            let _moving = self.status.moving();
            self.move_object_to_conveyor(sighting, slot.for_worker(self.id))
                .await?;
            self.coordinator.record_loaded_item().await;
        }

        self.coordinator.finish_loading(self.id).await?;
        Ok(())
    }

    async fn stage(&mut self) -> Result<()> {
        if self.staged {
            return Ok(());
        }
        let approach = self.config.conveyor_pose + CONVEYOR_APPROACH;
        {
            let _moving = self.status.moving();
            self.command(|m| m.move_to(approach)).await?;
        }
        self.staged = true;
        debug!("staged above conveyor");
        Ok(())
    }

    async fn unload_batch(&mut self) -> Result<()> {
        let count = self.coordinator.conveyor().await.items_on_belt();
        info!(count, "unloading belt");

        let mut removed = 0;
        for _ in 0..count {
            let slot = match self.coordinator.retreat_slot(self.id).await {
                Ok(slot) => slot,
                Err(err @ AppError::EmptyHistory(_)) => {
                    warn!(%err, removed, "no slot left to unload, skipping rest of batch");
                    break;
                }
                Err(err @ AppError::Desync(_)) => {
                    warn!(%err, removed, "unload aborted");
                    break;
                }
                Err(err) => return Err(err),
            };
            let _moving = self.status.moving();
            self.move_object_from_conveyor(slot.for_worker(self.id)).await?;
            removed += 1;
        }

        self.staged = false;
        self.coordinator.finish_unloading(self.id, removed).await;
        Ok(())
    }

    async fn sort(&mut self, sighting: ObjectSighting) -> Result<()> {
        let target = self.placement.next();
        {
            let _moving = self.status.moving();
            self.move_object(sighting, target).await?;
        }
        self.coordinator.record_sorted().await;
        self.coordinator.notify(CellEvent::ItemSorted {
            worker: self.id,
            kind: sighting.kind,
            position: target,
        });
        Ok(())
    }

    // ── Motion primitives ───────────────────────────────

    /// Run one controller command under the motion lock.
    ///
    /// Callers hold a [`MovingGuard`](super::coordinator::MovingGuard)
    /// around the whole motion this command belongs to.
    async fn command<'a, F>(&'a self, op: F) -> Result<()>
    where
        F: FnOnce(&'a dyn MotionClient) -> DriverFuture<'a, Result<()>>,
    {
        let _guard = self.motion_lock.lock().await;
        op(self.motion.as_ref()).await
    }

    async fn settle(&self, millis: u64) {
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    async fn move_to(&self, pose: Pose) -> Result<()> {
        self.command(|m| m.move_to(pose)).await?;
        self.settle(self.timing.post_move_ms).await;
        Ok(())
    }

    fn pose_at(&self, position: Position3D) -> Pose {
        Pose {
            x: position.x,
            y: position.y,
            z: position.z,
            ..self.config.idle_pose
        }
    }

    /// Grip the object of `kind` at `location`.
    async fn pick(&self, location: Position3D, kind: ObjectKind) -> Result<()> {
        let over = self.pose_at(location + kind.over_offset());
        let at = self.pose_at(location + kind.at_offset());
        self.move_to(over).await?;
        self.move_to(at).await?;
        self.command(|m| m.close_gripper()).await?;
        self.settle(self.timing.grip_settle_ms).await;
        self.move_to(over).await
    }

    /// Release the held object of `kind` at `location`.
    async fn place(&self, location: Position3D, kind: ObjectKind) -> Result<()> {
        let over = self.pose_at(location + kind.over_offset());
        let at = self.pose_at(location + kind.at_offset());
        self.move_to(over).await?;
        self.move_to(at).await?;
        self.command(|m| m.open_gripper()).await?;
        self.settle(self.timing.release_settle_ms).await;
        self.move_to(over).await
    }

    /// Cell to cell, through the idle pose.
    async fn move_object(&self, sighting: ObjectSighting, target: Position3D) -> Result<()> {
        self.pick(sighting.position, sighting.kind).await?;
        self.move_to(self.config.idle_pose).await?;
        self.place(target, sighting.kind).await?;
        self.move_to(self.config.idle_pose).await
    }

    async fn move_object_to_conveyor(&self, sighting: ObjectSighting, slot: Position3D) -> Result<()> {
        let approach = self.config.conveyor_pose + CONVEYOR_APPROACH;
        self.pick(sighting.position, sighting.kind).await?;
        self.move_to(self.config.idle_pose).await?;
        self.move_to(approach).await?;
        self.place(slot + sighting.kind.belt_place_offset(), sighting.kind)
            .await?;
        self.move_to(approach).await
    }

    async fn move_object_from_conveyor(&mut self, slot: Position3D) -> Result<()> {
        let kind = self.config.stores;
        let approach = self.config.conveyor_pose + CONVEYOR_APPROACH;
        self.move_to(approach).await?;
        self.pick(slot + kind.belt_pick_offset(), kind).await?;
        self.move_to(approach).await?;
        self.move_to(self.config.idle_pose).await?;
        let target = self.placement.next();
        self.place(target, kind).await?;
        self.move_to(self.config.idle_pose).await
    }
}

//! Start-up, supervision and shutdown of the three cell tasks.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GlobalConfig;
use crate::conveyor::controller::{BeltActuator, ConveyorController};
use crate::driver::{MotionClient, SensorGateway, VisionClient};
use crate::models::{ObjectKind, WorkerId};
use crate::placement::SlotPair;
use crate::{AppError, Result};

use super::coordinator::Coordinator;
use super::worker::{ManipulatorWorker, WorkerHandles};

/// External collaborators of a run.
pub struct Collaborators {
    /// Motion clients indexed by [`WorkerId::index`].
    pub motion: [Arc<dyn MotionClient>; 2],
    /// Vision for both cells.
    pub vision: Arc<dyn VisionClient>,
    /// Belt distance sensors.
    pub sensors: Arc<dyn SensorGateway>,
}

/// Handle to a running cell.
pub struct CellRuntime {
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// A cell whose controllers are initialised but whose tasks are not running.
pub struct PreparedCell {
    coordinator: Arc<Coordinator>,
    workers: Vec<ManipulatorWorker>,
    controller: ConveyorController,
}

/// Initialise both controllers and build the workers and the conveyor.
///
/// Fails before anything is built unless both controllers initialise.
///
/// # Errors
///
/// Returns `AppError::Startup` if a controller cannot be initialised, or
/// `AppError::Config` if a stack cannot be built.
pub async fn prepare(config: &GlobalConfig, collaborators: Collaborators) -> Result<PreparedCell> {
    for id in WorkerId::ALL {
        collaborators.motion[id.index()]
            .initialize()
            .await
            .map_err(|err| match err {
                AppError::Startup(_) => err,
                other => AppError::Startup(format!("{id}: {other}")),
            })?;
        info!(worker = %id, host = config.worker(id).host, "controller initialised");
    }

    // Belt slots are sized for the widest kind so either can be carried.
    let slots = SlotPair::new(
        config
            .worker1
            .slots
            .build("worker1-slots", ObjectKind::Cylinder)?,
        config
            .worker2
            .slots
            .build("worker2-slots", ObjectKind::Cylinder)?,
    );
    let coordinator = Arc::new(Coordinator::new(slots));
    let locks = [Arc::new(Mutex::new(())), Arc::new(Mutex::new(()))];

    let mut workers = Vec::with_capacity(2);
    for id in WorkerId::ALL {
        let handles = WorkerHandles {
            motion: Arc::clone(&collaborators.motion[id.index()]),
            motion_lock: Arc::clone(&locks[id.index()]),
            vision: Arc::clone(&collaborators.vision),
            coordinator: Arc::clone(&coordinator),
        };
        workers.push(ManipulatorWorker::new(
            id,
            config.worker(id).clone(),
            config.handoff.clone(),
            config.motion.clone(),
            handles,
        )?);
    }

    let owner = config.conveyor.owner;
    let actuator = BeltActuator::new(
        Arc::clone(&collaborators.motion[owner.index()]),
        Arc::clone(&locks[owner.index()]),
        config.conveyor.speed_channel,
        config.conveyor.pulse(),
    );
    let controller = ConveyorController::new(
        config.conveyor.clone(),
        Arc::clone(&coordinator),
        Arc::clone(&collaborators.sensors),
        actuator,
    );
    debug!(conveyor_owner = %owner, "cell prepared");

    Ok(PreparedCell {
        coordinator,
        workers,
        controller,
    })
}

/// Initialise and spawn in one step.
///
/// # Errors
///
/// See [`prepare`].
pub async fn start(
    config: &GlobalConfig,
    collaborators: Collaborators,
    cancel: CancellationToken,
) -> Result<CellRuntime> {
    Ok(prepare(config, collaborators).await?.spawn(cancel))
}

impl PreparedCell {
    /// Shared coordination state, available before any task runs.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Spawn both workers and the conveyor task.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> CellRuntime {
        let mut tasks = Vec::with_capacity(3);
        for (name, worker) in ["worker1", "worker2"].into_iter().zip(self.workers) {
            tasks.push((name, worker.spawn(cancel.clone())));
        }
        tasks.push(("conveyor", self.controller.spawn(cancel.clone())));
        info!("cell started");

        CellRuntime {
            coordinator: self.coordinator,
            cancel,
            tasks,
        }
    }
}

impl CellRuntime {
    /// Shared coordination state of this run.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Token that stops the run.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request shutdown and wait for every task to exit.
    pub async fn shutdown(self) {
        info!("cell shutting down");
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for every task to exit.
    pub async fn join(self) {
        for (name, handle) in self.tasks {
            match handle.await {
                Ok(()) => info!(task = name, "task exited"),
                Err(err) if err.is_panic() => error!(task = name, %err, "task panicked"),
                Err(err) => warn!(task = name, %err, "task aborted"),
            }
        }
    }
}

//! Shared handoff state: tokens, belt record, mirrored slot stacks.
//!
//! The [`Coordinator`] is the only mutable state shared between the two
//! worker tasks and the conveyor task. Every mutation happens under one
//! coarse lock, so two workers can never both believe they hold the move
//! token. The lock is never held across a motion command.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Barrier, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conveyor::ConveyorState;
use crate::models::{CellEvent, ConveyorStatus, Direction, WorkerId, WorkerStatus, Workload};
use crate::placement::slots::SlotPosition;
use crate::placement::SlotPair;
use crate::{AppError, Result};

/// Capacity of the event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// Worker that recomputes tokens at every rendezvous.
pub const DECISION_LEADER: WorkerId = WorkerId::Worker1;

/// Who may load and who may unload the belt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffTokens {
    /// Worker authorised to load the belt.
    pub mover: Option<WorkerId>,
    /// Worker authorised to unload the belt.
    pub picker: Option<WorkerId>,
    /// Batch currently on the belt, if any.
    pub batch: Option<Uuid>,
}

impl HandoffTokens {
    /// No token is held.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.mover.is_none() && self.picker.is_none()
    }

    /// Whether `worker` holds either token.
    #[must_use]
    pub fn holds(&self, worker: WorkerId) -> bool {
        self.mover == Some(worker) || self.picker == Some(worker)
    }
}

/// Consistent view of the belt and tokens taken under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Belt record.
    pub conveyor: ConveyorState,
    /// Token holders.
    pub tokens: HandoffTokens,
}

/// Outcome of a token decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    /// Worker that will load the next batch.
    pub mover: Option<WorkerId>,
    /// Both cells were empty after work had been done.
    pub pass_complete: bool,
}

/// Choose the mover from both cells' workloads.
///
/// Only a worker with something to hand across is a candidate. The
/// candidate with the smaller combined workload wins; ties go to worker1.
#[must_use]
pub fn decide_mover(workloads: [Workload; 2]) -> Option<WorkerId> {
    WorkerId::ALL
        .into_iter()
        .filter(|id| workloads[id.index()].moves > 0)
        .min_by_key(|id| workloads[id.index()].total())
}

/// Lock-free status of one worker, readable by the peer.
#[derive(Debug)]
pub struct WorkerStatusCell(AtomicU8);

impl Default for WorkerStatusCell {
    fn default() -> Self {
        Self(AtomicU8::new(Self::encode(WorkerStatus::NotReady)))
    }
}

impl WorkerStatusCell {
    const fn encode(status: WorkerStatus) -> u8 {
        match status {
            WorkerStatus::NotReady => 0,
            WorkerStatus::Ready => 1,
            WorkerStatus::Moving => 2,
        }
    }

    /// Current status.
    #[must_use]
    pub fn load(&self) -> WorkerStatus {
        match self.0.load(Ordering::SeqCst) {
            1 => WorkerStatus::Ready,
            2 => WorkerStatus::Moving,
            _ => WorkerStatus::NotReady,
        }
    }

    /// Replace the status.
    pub fn store(&self, status: WorkerStatus) {
        self.0.store(Self::encode(status), Ordering::SeqCst);
    }

    /// Hold the worker in `Moving` until the guard drops.
    #[must_use]
    pub fn moving(self: &Arc<Self>) -> MovingGuard {
        self.store(WorkerStatus::Moving);
        MovingGuard(Arc::clone(self))
    }
}

/// Keeps a worker `Moving` for the span of one pick, place or composite
/// motion; restores `Ready` on drop.
#[derive(Debug)]
pub struct MovingGuard(Arc<WorkerStatusCell>);

impl Drop for MovingGuard {
    fn drop(&mut self) {
        self.0.store(WorkerStatus::Ready);
    }
}

struct SharedState {
    conveyor: ConveyorState,
    tokens: HandoffTokens,
    slots: SlotPair,
    workloads: [Workload; 2],
    last_decision: Decision,
    handled: usize,
}

/// Shared coordination context passed by `Arc` to all three tasks.
pub struct Coordinator {
    state: Mutex<SharedState>,
    statuses: [Arc<WorkerStatusCell>; 2],
    events: broadcast::Sender<CellEvent>,
    barrier: Barrier,
    fault: CancellationToken,
}

impl Coordinator {
    /// Create the coordinator around the mirrored belt slot stacks.
    #[must_use]
    pub fn new(slots: SlotPair) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(SharedState {
                conveyor: ConveyorState::new(),
                tokens: HandoffTokens::default(),
                slots,
                workloads: [Workload::default(); 2],
                last_decision: Decision::default(),
                handled: 0,
            }),
            statuses: [
                Arc::new(WorkerStatusCell::default()),
                Arc::new(WorkerStatusCell::default()),
            ],
            events,
            barrier: Barrier::new(2),
            fault: CancellationToken::new(),
        }
    }

    /// Subscribe to cell events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CellEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: CellEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    /// Status cell shared with `worker`.
    #[must_use]
    pub fn status_cell(&self, worker: WorkerId) -> Arc<WorkerStatusCell> {
        Arc::clone(&self.statuses[worker.index()])
    }

    /// Current status of `worker`.
    #[must_use]
    pub fn worker_status(&self, worker: WorkerId) -> WorkerStatus {
        self.statuses[worker.index()].load()
    }

    /// Whether any worker has a motion command in flight.
    #[must_use]
    pub fn any_moving(&self) -> bool {
        self.statuses
            .iter()
            .any(|cell| cell.load() == WorkerStatus::Moving)
    }

    /// Whether a worker has faulted during this run.
    #[must_use]
    pub fn has_fault(&self) -> bool {
        self.fault.is_cancelled()
    }

    /// Consistent copy of the belt record and tokens.
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().await;
        Snapshot {
            conveyor: state.conveyor,
            tokens: state.tokens,
        }
    }

    /// Current token holders.
    pub async fn tokens(&self) -> HandoffTokens {
        self.state.lock().await.tokens
    }

    /// Current belt record.
    pub async fn conveyor(&self) -> ConveyorState {
        self.state.lock().await.conveyor
    }

    /// Number of issued belt slots, if both views agree.
    pub async fn issued_slots(&self) -> Option<usize> {
        self.state.lock().await.slots.issued()
    }

    /// Copy of the mirrored slot stacks.
    pub async fn slots(&self) -> SlotPair {
        self.state.lock().await.slots.clone()
    }

    fn apply(&self, state: &mut SharedState, next: ConveyorStatus, direction: Direction) -> Result<()> {
        let from = state.conveyor.transition(next, direction)?;
        let direction = state.conveyor.direction();
        debug!(?from, to = ?next, ?direction, "conveyor transition");
        self.publish(CellEvent::ConveyorTransition {
            from,
            to: next,
            direction,
        });
        Ok(())
    }

    // ── Conveyor task ───────────────────────────────────

    /// Start a transit if the belt is idle.
    ///
    /// Returns `false` when the belt is not `Ready` (for example because a
    /// worker is still loading it).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if `direction` is `None`.
    pub async fn begin_transit(&self, direction: Direction) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.conveyor.status() != ConveyorStatus::Ready {
            return Ok(false);
        }
        self.apply(&mut state, ConveyorStatus::Moving, direction)?;
        Ok(true)
    }

    /// The belt stopped at its destination with items reachable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless the belt was `Moving`.
    pub async fn arrive(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.apply(&mut state, ConveyorStatus::Unloading, Direction::None)
    }

    /// The belt is empty again and available for a new cycle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless the belt was `Unloading`.
    pub async fn release_belt(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.apply(&mut state, ConveyorStatus::Ready, Direction::None)
    }

    /// Force the belt record back to `Ready` after an abandoned cycle.
    pub async fn abandon_cycle(&self) {
        let mut state = self.state.lock().await;
        let from = state.conveyor.force_ready();
        if from != ConveyorStatus::Ready {
            warn!(
                ?from,
                items = state.conveyor.items_on_belt(),
                "conveyor cycle abandoned, belt record forced to ready"
            );
            self.publish(CellEvent::ConveyorTransition {
                from,
                to: ConveyorStatus::Ready,
                direction: Direction::None,
            });
        }
    }

    // ── Mover ───────────────────────────────────────────

    /// Claim the belt for loading.
    ///
    /// Succeeds only for the current mover while the belt is idle and empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the belt record rejects the
    /// change.
    pub async fn begin_loading(&self, worker: WorkerId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.tokens.mover != Some(worker)
            || state.conveyor.status() != ConveyorStatus::Ready
            || state.conveyor.items_on_belt() != 0
        {
            return Ok(false);
        }
        self.apply(&mut state, ConveyorStatus::Loading, Direction::None)?;
        Ok(true)
    }

    /// Advance both slot stacks and return the next belt slot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Desync` if the stacks diverged; both stacks and
    /// the item count are reset before returning.
    pub async fn advance_slot(&self, worker: WorkerId) -> Result<SlotPosition> {
        let mut state = self.state.lock().await;
        let result = state.slots.advance();
        self.recover_on_desync(&mut state, worker, result)
    }

    /// Count an item the mover has placed on the belt.
    pub async fn record_loaded_item(&self) {
        self.state.lock().await.conveyor.add_item();
    }

    /// Finish loading: release the belt and pass the batch to the peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the belt was not `Loading`.
    pub async fn finish_loading(&self, worker: WorkerId) -> Result<Option<Uuid>> {
        let mut state = self.state.lock().await;
        self.apply(&mut state, ConveyorStatus::Ready, Direction::None)?;
        let count = state.conveyor.items_on_belt();
        state.tokens.mover = None;
        if count == 0 {
            return Ok(None);
        }

        let batch = Uuid::new_v4();
        state.tokens.picker = Some(worker.other());
        state.tokens.batch = Some(batch);
        info!(%worker, picker = %worker.other(), %batch, count, "batch loaded");
        self.publish(CellEvent::BatchLoaded {
            worker,
            batch,
            count,
        });
        Ok(Some(batch))
    }

    /// Give up the move token without loading.
    pub async fn relinquish_move(&self, worker: WorkerId) {
        let mut state = self.state.lock().await;
        if state.tokens.mover == Some(worker) {
            state.tokens.mover = None;
            debug!(%worker, "move token relinquished");
        }
    }

    // ── Picker ──────────────────────────────────────────

    /// Take back the most recent belt slot from both stacks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::EmptyHistory` if no slot is issued, or
    /// `AppError::Desync` (after resetting) if the stacks diverged.
    pub async fn retreat_slot(&self, worker: WorkerId) -> Result<SlotPosition> {
        let mut state = self.state.lock().await;
        let result = state.slots.retreat();
        self.recover_on_desync(&mut state, worker, result)
    }

    /// Finish unloading: reset both slot stacks and clear the belt.
    pub async fn finish_unloading(&self, worker: WorkerId, count: usize) {
        let mut state = self.state.lock().await;
        state.slots.reset();
        state.conveyor.clear_items();
        let batch = state.tokens.batch.take();
        if state.tokens.picker == Some(worker) {
            state.tokens.picker = None;
        }
        state.handled += count;
        info!(%worker, count, ?batch, "batch unloaded");
        self.publish(CellEvent::BatchUnloaded {
            worker,
            batch,
            count,
        });
    }

    // ── Own cell ────────────────────────────────────────

    /// Count an object stacked in a worker's own cell.
    pub async fn record_sorted(&self) {
        self.state.lock().await.handled += 1;
    }

    /// Publish an event on behalf of a worker.
    pub fn notify(&self, event: CellEvent) {
        self.publish(event);
    }

    // ── Faults ──────────────────────────────────────────

    /// Drop every token `worker` holds.
    ///
    /// A mover interrupted mid-load releases the belt; items already placed
    /// are still handed to the peer.
    pub async fn release(&self, worker: WorkerId) {
        let mut state = self.state.lock().await;
        if state.tokens.mover == Some(worker) {
            state.tokens.mover = None;
            if state.conveyor.status() == ConveyorStatus::Loading {
                if let Err(err) = self.apply(&mut state, ConveyorStatus::Ready, Direction::None) {
                    warn!(%worker, %err, "failed to release belt after interrupted load");
                }
                let placed = state.conveyor.items_on_belt();
                // A slot issued for an item that never reached the belt.
                while state.slots.issued().is_some_and(|issued| issued > placed) {
                    if state.slots.retreat().is_err() {
                        break;
                    }
                }
                if placed > 0 {
                    state.tokens.picker = Some(worker.other());
                    state.tokens.batch = Some(Uuid::new_v4());
                }
            }
        }
        if state.tokens.picker == Some(worker) {
            state.tokens.picker = None;
            state.tokens.batch = None;
        }
    }

    /// Record a fatal fault: release tokens and disable rendezvous.
    pub async fn fault(&self, worker: WorkerId, reason: &AppError) {
        self.release(worker).await;
        self.statuses[worker.index()].store(WorkerStatus::NotReady);
        self.fault.cancel();
        warn!(%worker, %reason, "worker faulted, tokens released");
        self.publish(CellEvent::WorkerFaulted {
            worker,
            reason: reason.to_string(),
        });
    }

    fn recover_on_desync(
        &self,
        state: &mut SharedState,
        worker: WorkerId,
        result: Result<SlotPosition>,
    ) -> Result<SlotPosition> {
        if let Err(AppError::Desync(_)) = &result {
            state.slots.reset();
            state.conveyor.clear_items();
            warn!(%worker, "slot stacks reset after desync");
            self.publish(CellEvent::DesyncRecovered { worker });
        }
        result
    }

    // ── Rendezvous ──────────────────────────────────────

    /// Meet the peer, publish new tokens and return the decision.
    ///
    /// Both workers report their workload, then the leader computes the
    /// mover and publishes it; the second barrier guarantees both observe
    /// the same tokens. Returns `None` once any worker has faulted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Shutdown` if `cancel` fires while waiting.
    pub async fn rendezvous(
        &self,
        worker: WorkerId,
        workload: Workload,
        cancel: &CancellationToken,
    ) -> Result<Option<Decision>> {
        if self.has_fault() {
            return Ok(None);
        }
        self.state.lock().await.workloads[worker.index()] = workload;

        if !self.barrier_wait(cancel).await? {
            return Ok(None);
        }

        if worker == DECISION_LEADER {
            self.decide().await;
        }

        if !self.barrier_wait(cancel).await? {
            return Ok(None);
        }

        Ok(Some(self.state.lock().await.last_decision))
    }

    /// Rendezvous for a re-balance, deferred while either worker moves.
    ///
    /// Returns `None` without touching the barrier if a motion is in
    /// flight, so an idle worker never blocks on a busy peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Shutdown` if `cancel` fires while waiting.
    pub async fn rebalance(
        &self,
        worker: WorkerId,
        workload: Workload,
        cancel: &CancellationToken,
    ) -> Result<Option<Decision>> {
        if self.any_moving() {
            debug!(%worker, "worker moving, re-balance deferred");
            return Ok(None);
        }
        self.rendezvous(worker, workload, cancel).await
    }

    async fn decide(&self) {
        let mut state = self.state.lock().await;
        let workloads = state.workloads;
        let pass_complete = workloads.iter().all(|w| w.total() == 0) && state.handled > 0;
        if pass_complete {
            state.handled = 0;
            info!("sorting pass complete");
            self.publish(CellEvent::PassComplete);
        }

        let mover = if state.tokens.is_idle() {
            let mover = decide_mover(workloads);
            state.tokens.mover = mover;
            mover
        } else {
            warn!(tokens = ?state.tokens, "tokens still held at rendezvous, keeping them");
            state.tokens.mover
        };

        info!(
            ?mover,
            worker1_moves = workloads[0].moves,
            worker1_stores = workloads[0].stores,
            worker2_moves = workloads[1].moves,
            worker2_stores = workloads[1].stores,
            "tokens assigned"
        );
        self.publish(CellEvent::TokensAssigned { mover });
        state.last_decision = Decision {
            mover,
            pass_complete,
        };
    }

    async fn barrier_wait(&self, cancel: &CancellationToken) -> Result<bool> {
        tokio::select! {
            () = cancel.cancelled() => Err(AppError::Shutdown("rendezvous interrupted".into())),
            () = self.fault.cancelled() => Ok(false),
            _ = self.barrier.wait() => Ok(true),
        }
    }
}

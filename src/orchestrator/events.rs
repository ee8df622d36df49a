//! Event logger: turns [`CellEvent`]s into structured log lines.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::models::CellEvent;

/// Spawn a task that logs every event until `cancel` fires or the channel
/// closes.
#[must_use]
pub fn spawn_event_logger(
    mut rx: broadcast::Receiver<CellEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event logger lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                log_event(&event);
            }
        }
        .instrument(info_span!("events")),
    )
}

/// Wait for the logger task to exit.
///
/// Returns `false`, after logging why, if the task panicked or was aborted.
pub async fn join_event_logger(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(err) if err.is_panic() => {
            error!(%err, "event logger panicked");
            false
        }
        Err(err) => {
            warn!(%err, "event logger aborted");
            false
        }
    }
}

fn log_event(event: &CellEvent) {
    match event {
        CellEvent::ConveyorTransition {
            from,
            to,
            direction,
        } => info!(?from, ?to, ?direction, "conveyor"),
        CellEvent::TokensAssigned { mover } => info!(?mover, "tokens"),
        CellEvent::BatchLoaded {
            worker,
            batch,
            count,
        } => info!(%worker, %batch, count, "batch loaded"),
        CellEvent::BatchUnloaded {
            worker,
            batch,
            count,
        } => info!(%worker, ?batch, count, "batch unloaded"),
        CellEvent::ItemSorted {
            worker,
            kind,
            position,
        } => info!(%worker, ?kind, ?position, "item sorted"),
        CellEvent::PassComplete => info!("pass complete"),
        CellEvent::DesyncRecovered { worker } => warn!(%worker, "slot desync recovered"),
        CellEvent::WorkerFaulted { worker, reason } => warn!(%worker, reason, "worker faulted"),
    }
}

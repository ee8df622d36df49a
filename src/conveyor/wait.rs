//! Cancellable polling helpers.
//!
//! Every blocking wait in the conveyor cycle polls on a fixed interval and
//! gives up as soon as the shutdown token fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::driver::SensorGateway;
use crate::{AppError, Result};

/// Sleep for `duration` unless cancelled first.
///
/// # Errors
///
/// Returns `AppError::Shutdown` if `cancel` fires before the sleep ends.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(AppError::Shutdown("sleep interrupted".into())),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Poll `check` every `interval` until it returns `true`.
///
/// # Errors
///
/// Returns `AppError::Shutdown` if `cancel` fires first.
pub async fn poll_until<F, Fut>(
    what: &str,
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Shutdown(format!("stopped waiting for {what}")));
        }
        if check().await {
            return Ok(());
        }
        trace!(what, "condition not met yet");
        sleep_or_cancel(interval, cancel).await?;
    }
}

/// Block until `sensor` reports presence (`present == true`) or absence.
///
/// Out-of-range reads count as absence.
///
/// # Errors
///
/// Returns `AppError::Shutdown` if `cancel` fires first.
pub async fn wait_for_sensor(
    sensors: &dyn SensorGateway,
    sensor: u8,
    threshold: u16,
    present: bool,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let what = if present { "object" } else { "clearance" };
    poll_until(what, interval, cancel, move || async move {
        sensors.read_distance(sensor).await.is_object_present(threshold) == present
    })
    .await?;
    debug!(sensor, present, "sensor condition met");
    Ok(())
}

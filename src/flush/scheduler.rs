use std::sync::Arc;

use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::FlushCause;

use super::Flusher;

pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 283;
/// One week.
pub const MAX_FLUSH_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Accepts intervals between one second and [`MAX_FLUSH_INTERVAL_SECS`].
pub fn check_flush_interval(period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(Error::Configuration(
            "flush interval must be a positive number of seconds".into(),
        ));
    }
    if period > Duration::from_secs(MAX_FLUSH_INTERVAL_SECS) {
        return Err(Error::Configuration(format!(
            "flush interval of {}s exceeds the maximum of {MAX_FLUSH_INTERVAL_SECS}s",
            period.as_secs()
        )));
    }
    Ok(())
}

/// Flushes every `period`, starting one full period after launch. Cancellation
/// is only observed between flushes, so a running flush always completes.
pub fn spawn_flush_scheduler(
    flusher: Arc<Flusher>,
    period: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let Some(start) = Instant::now().checked_add(period) else {
            error!("flush interval {}s is out of range, scheduler not started", period.as_secs());
            cancel_token.cancelled().await;
            return 0;
        };
        let mut ticker = time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fired: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    fired += 1;
                    if let Err(err) = flusher.flush(FlushCause::Scheduled).await {
                        warn!("scheduled flush #{fired} failed: {err}");
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("flush scheduler shutting down after {fired} flushes");
                    break;
                }
            }
        }

        fired
    })
}

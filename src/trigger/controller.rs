use std::sync::Arc;

use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::flush::Flusher;
use crate::models::FlushCause;
use crate::presence::PresenceHandle;
use crate::report::SnapshotReporter;

use super::{Trigger, TriggerSource};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerStats {
    pub flushes: u64,
    pub reports: u64,
}

/// Serves triggers in arrival order until cancelled or the source runs dry.
/// The trigger being served is finished before cancellation is observed.
pub fn spawn_trigger_controller(
    mut source: Box<dyn TriggerSource>,
    flusher: Arc<Flusher>,
    reporter: SnapshotReporter,
    presence: PresenceHandle,
    cancel_token: CancellationToken,
) -> JoinHandle<TriggerStats> {
    tokio::spawn(async move {
        let mut stats = TriggerStats::default();

        loop {
            let trigger = tokio::select! {
                trigger = source.next_trigger() => trigger,
                _ = cancel_token.cancelled() => break,
            };

            let Some(trigger) = trigger else {
                info!("trigger source closed");
                break;
            };

            info!("Received {trigger} trigger");
            match trigger {
                Trigger::Flush => {
                    stats.flushes += 1;
                    if let Err(err) = flusher.flush(FlushCause::Trigger).await {
                        warn!("triggered flush failed: {err}");
                    }
                }
                Trigger::Report => {
                    stats.reports += 1;
                    if let Err(err) = reporter.report(&presence).await {
                        warn!("triggered report failed: {err:#}");
                    }
                }
            }
        }

        stats
    })
}

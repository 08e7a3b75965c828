pub mod scheduler;

use std::sync::Arc;

use log::{error, info};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{FlushBatch, FlushCause, FlushPolicy, PresenceSnapshot};
use crate::presence::PresenceHandle;
use crate::sink::PersistenceSink;

pub use scheduler::{
    check_flush_interval, spawn_flush_scheduler, DEFAULT_FLUSH_INTERVAL_SECS,
    MAX_FLUSH_INTERVAL_SECS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    pub batch_id: Uuid,
    pub cause: FlushCause,
    pub clients: usize,
}

/// The one flush operation, shared by the scheduler and the flush trigger.
pub struct Flusher {
    presence: PresenceHandle,
    sink: Arc<dyn PersistenceSink>,
    policy: FlushPolicy,
    in_flight: Mutex<()>,
}

impl Flusher {
    pub fn new(presence: PresenceHandle, sink: Arc<dyn PersistenceSink>, policy: FlushPolicy) -> Self {
        Self {
            presence,
            sink,
            policy,
            in_flight: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Snapshots the table, applies the flush policy and hands the batch to the
    /// sink. A sink failure is logged and returned; the policy has already
    /// been applied by then.
    pub async fn flush(&self, cause: FlushCause) -> Result<FlushOutcome> {
        let _guard = self.in_flight.lock().await;

        info!("Flushing current clients ({}, {})...", cause.as_str(), self.policy.as_str());
        let snapshot = self.presence.take_for_flush(self.policy).await?;
        persist_snapshot(self.sink.as_ref(), cause, self.policy, snapshot).await
    }
}

/// Hands one snapshot to `sink` and logs the result.
pub async fn persist_snapshot(
    sink: &dyn PersistenceSink,
    cause: FlushCause,
    policy: FlushPolicy,
    snapshot: PresenceSnapshot,
) -> Result<FlushOutcome> {
    let batch = FlushBatch::new(cause, policy, snapshot);
    let outcome = FlushOutcome {
        batch_id: batch.id,
        cause,
        clients: batch.len(),
    };

    match sink.persist(&batch).await {
        Ok(()) => {
            info!(
                "Flush complete! {} clients flushed to {} sink (batch {})",
                outcome.clients,
                sink.name(),
                outcome.batch_id
            );
            Ok(outcome)
        }
        Err(err) => {
            let err = Error::Persistence(err);
            error!(
                "Flush of {} clients (batch {}) was not persisted: {err}",
                outcome.clients, outcome.batch_id
            );
            Err(err)
        }
    }
}

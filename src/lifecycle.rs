//! Starts the monitor's tasks, waits for the observation source to end and
//! tears everything down in order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::flush::{check_flush_interval, persist_snapshot, spawn_flush_scheduler, Flusher};
use crate::models::{FlushCause, FlushPolicy};
use crate::presence::{IngestTask, PresenceTable};
use crate::queue::{event_queue, OverflowPolicy};
use crate::report::SnapshotReporter;
use crate::sink::PersistenceSink;
use crate::source::ObservationSource;
use crate::trigger::{spawn_trigger_controller, TriggerSource, TriggerStats};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub flush_interval: Duration,
    pub flush_policy: FlushPolicy,
    /// Hand the final table to the sink after the closing report.
    pub flush_on_exit: bool,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            overflow: config.overflow,
            flush_interval: config.flush_interval,
            flush_policy: config.flush_policy,
            flush_on_exit: config.flush_on_exit,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub events_applied: u64,
    pub events_dropped: u64,
    pub clients_at_exit: usize,
    pub scheduled_flushes: u64,
    pub triggers: TriggerStats,
}

pub struct Monitor {
    settings: MonitorSettings,
    sink: Arc<dyn PersistenceSink>,
    reporter: SnapshotReporter,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        sink: Arc<dyn PersistenceSink>,
        reporter: SnapshotReporter,
    ) -> Self {
        Self {
            settings,
            sink,
            reporter,
        }
    }

    /// Runs until `source` ends or `shutdown` is cancelled, then writes one
    /// final report. A source that fails still gets the final report before
    /// its error is returned.
    pub async fn run(
        &self,
        source: Box<dyn ObservationSource>,
        triggers: Box<dyn TriggerSource>,
        shutdown: CancellationToken,
    ) -> Result<RunSummary> {
        check_flush_interval(self.settings.flush_interval)?;

        let (events_tx, events_rx) =
            event_queue(self.settings.queue_capacity, self.settings.overflow)?;
        let (ingest, presence) = IngestTask::spawn(PresenceTable::new(), events_rx);

        let flusher = Arc::new(Flusher::new(
            presence.clone(),
            Arc::clone(&self.sink),
            self.settings.flush_policy,
        ));
        let control_token = CancellationToken::new();
        let scheduler = spawn_flush_scheduler(
            Arc::clone(&flusher),
            self.settings.flush_interval,
            control_token.clone(),
        );
        let controller = spawn_trigger_controller(
            triggers,
            Arc::clone(&flusher),
            self.reporter.clone(),
            presence,
            control_token.clone(),
        );

        info!(
            "Monitoring {} (flush every {}s, {}, queue {} / {:?})",
            source.describe(),
            self.settings.flush_interval.as_secs(),
            self.settings.flush_policy.as_str(),
            self.settings.queue_capacity,
            self.settings.overflow
        );

        let source_task = tokio::spawn(source.run(events_tx, shutdown.child_token()));
        let source_error = match source_task.await {
            Ok(Ok(())) => {
                if shutdown.is_cancelled() {
                    info!("Shutdown requested, stopping");
                } else {
                    info!("Observation source finished");
                }
                None
            }
            Ok(Err(err)) => {
                error!("Observation source failed: {err:#}");
                Some(Error::SourceTermination(err))
            }
            Err(join_err) => {
                error!("Observation source task panicked: {join_err}");
                Some(Error::SourceTermination(anyhow!(join_err)))
            }
        };

        // Scheduler and trigger controller finish any flush they started.
        control_token.cancel();
        let scheduled_flushes = scheduler.await.unwrap_or_else(|err| {
            warn!("flush scheduler task failed: {err}");
            0
        });
        let triggers = controller.await.unwrap_or_else(|err| {
            warn!("trigger controller task failed: {err}");
            TriggerStats::default()
        });
        drop(flusher);

        let outcome = ingest.shutdown().await.map_err(|err| {
            error!("ingestion loop did not stop cleanly: {err:#}");
            Error::IngestionStopped
        })?;

        let snapshot = outcome.table.snapshot();
        if let Err(err) = self.reporter.write_snapshot(&snapshot) {
            warn!("final report failed: {err:#}");
        }
        if self.settings.flush_on_exit {
            // Already logged by persist_snapshot.
            let _ = persist_snapshot(
                self.sink.as_ref(),
                FlushCause::Shutdown,
                self.settings.flush_policy,
                snapshot.clone(),
            )
            .await;
        }

        let summary = RunSummary {
            events_applied: outcome.table.events_applied(),
            events_dropped: outcome.events_dropped,
            clients_at_exit: snapshot.len(),
            scheduled_flushes,
            triggers,
        };
        info!(
            "Stopped: {} events applied, {} dropped, {} clients at exit",
            summary.events_applied, summary.events_dropped, summary.clients_at_exit
        );

        match source_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

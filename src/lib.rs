pub mod config;
pub mod db;
pub mod error;
pub mod flush;
pub mod lifecycle;
pub mod models;
pub mod presence;
pub mod queue;
pub mod report;
pub mod sink;
pub mod source;
pub mod trigger;
pub mod utils;

use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

pub use config::{Cli, MonitorConfig};
pub use db::Database;
pub use error::{Error, Result};
pub use lifecycle::{Monitor, MonitorSettings, RunSummary};
pub use models::{FlushBatch, FlushCause, FlushPolicy, MacAddress, Observation, PresenceRecord};
pub use report::SnapshotReporter;
pub use sink::{JsonlSink, MemorySink, PersistenceSink};

/// Opens the configured sink, wires OS signals to triggers and runs the
/// monitor until the capture ends or `shutdown` fires.
#[cfg(unix)]
pub async fn run(config: MonitorConfig, shutdown: CancellationToken) -> Result<RunSummary> {
    let sink: Arc<dyn PersistenceSink> = match &config.jsonl {
        Some(path) => Arc::new(JsonlSink::new(path.clone()).map_err(unusable_sink)?),
        None => Arc::new(Database::new(config.database.clone()).map_err(unusable_sink)?),
    };
    info!("Flushed snapshots go to the {} sink", sink.name());

    let triggers = trigger::SignalTriggers::new().map_err(|err| {
        Error::Configuration(format!("failed to install signal handlers: {err:#}"))
    })?;
    let source = source::build_source(
        &config.target,
        config.tshark.clone(),
        config.display_filter.clone(),
    );

    let monitor = Monitor::new(
        MonitorSettings::from(&config),
        sink,
        SnapshotReporter::stdout(),
    );
    monitor.run(source, Box::new(triggers), shutdown).await
}

#[cfg(unix)]
fn unusable_sink(err: anyhow::Error) -> Error {
    Error::Configuration(format!("cannot open persistence sink: {err:#}"))
}

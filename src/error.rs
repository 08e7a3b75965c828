use thiserror::Error;

/// Failure categories of the monitor. Configuration and source termination are
/// fatal; everything else is logged and the monitor keeps running.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("observation source terminated abnormally: {0:#}")]
    SourceTermination(#[source] anyhow::Error),

    #[error("persistence sink failed: {0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("event queue is closed")]
    QueueClosed,

    #[error("ingestion loop is no longer running")]
    IngestionStopped,
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::SourceTermination(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

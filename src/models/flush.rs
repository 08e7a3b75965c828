use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PresenceSnapshot;

/// What happens to the in-memory table once its snapshot has been taken for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FlushPolicy {
    /// Start over after every flush; each batch covers "seen since last flush".
    #[default]
    #[value(name = "clear", alias = "clear-on-flush")]
    ClearOnFlush,
    /// Keep accumulating; each batch is a cumulative view.
    #[value(name = "retain", alias = "retain-on-flush")]
    RetainOnFlush,
}

impl FlushPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushPolicy::ClearOnFlush => "clear-on-flush",
            FlushPolicy::RetainOnFlush => "retain-on-flush",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlushCause {
    Scheduled,
    Trigger,
    Shutdown,
}

impl FlushCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushCause::Scheduled => "Scheduled",
            FlushCause::Trigger => "Trigger",
            FlushCause::Shutdown => "Shutdown",
        }
    }
}

/// One snapshot on its way to a persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushBatch {
    pub id: Uuid,
    pub cause: FlushCause,
    pub policy: FlushPolicy,
    pub flushed_at: DateTime<Utc>,
    pub snapshot: PresenceSnapshot,
}

impl FlushBatch {
    pub fn new(cause: FlushCause, policy: FlushPolicy, snapshot: PresenceSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            cause,
            policy,
            flushed_at: Utc::now(),
            snapshot,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

//! Rows of the flush history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FlushCause, FlushPolicy, MacAddress};

/// One persisted flush, without its sightings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlushRecord {
    pub id: String,
    /// Presence table the batch came from; absent on rows older than schema v3.
    pub table_id: Option<String>,
    pub cause: FlushCause,
    pub policy: FlushPolicy,
    pub flushed_at: DateTime<Utc>,
    pub snapshot_taken_at: DateTime<Utc>,
    pub client_count: u64,
}

/// Running totals for one client across every flush it appeared in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientTotals {
    pub mac: MacAddress,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub times_seen: u64,
    pub seen_secs: u64,
    pub flush_count: u64,
}

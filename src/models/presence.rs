use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MacAddress;

/// A single sighting of a client, as delivered by an observation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub mac: MacAddress,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(mac: MacAddress, timestamp: DateTime<Utc>) -> Self {
        Self { mac, timestamp }
    }
}

/// Aggregated sightings of one client since it entered the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub times_seen: u64,
}

impl PresenceRecord {
    pub fn first_sighting(timestamp: DateTime<Utc>) -> Self {
        Self {
            first_seen: timestamp,
            last_seen: timestamp,
            times_seen: 1,
        }
    }

    /// Applies a repeat sighting. `last_seen` follows processing order; an
    /// earlier timestamp also pulls `first_seen` back so it never exceeds `last_seen`.
    pub fn record_sighting(&mut self, timestamp: DateTime<Utc>) {
        self.last_seen = timestamp;
        if timestamp < self.first_seen {
            self.first_seen = timestamp;
        }
        self.times_seen = self.times_seen.saturating_add(1);
    }

    pub fn seen_secs(&self) -> i64 {
        (self.last_seen - self.first_seen).num_seconds().max(0)
    }
}

/// Point-in-time copy of the presence table, ordered by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// The table this copy came from. Retained snapshots of one table are
    /// cumulative; snapshots of different tables never overlap.
    #[serde(default)]
    pub table_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub clients: BTreeMap<MacAddress, PresenceRecord>,
}

impl PresenceSnapshot {
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&PresenceRecord> {
        self.clients.get(mac)
    }

    pub fn total_sightings(&self) -> u64 {
        self.clients
            .values()
            .fold(0u64, |acc, record| acc.saturating_add(record.times_seen))
    }
}

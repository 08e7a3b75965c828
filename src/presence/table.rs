use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::models::{FlushPolicy, MacAddress, Observation, PresenceRecord, PresenceSnapshot};

/// Authoritative presence state. Owned by the ingestion loop; everyone else
/// sees it through snapshots.
#[derive(Debug)]
pub struct PresenceTable {
    id: Uuid,
    clients: HashMap<MacAddress, PresenceRecord>,
    events_applied: u64,
}

impl Default for PresenceTable {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            clients: HashMap::new(),
            events_applied: 0,
        }
    }
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh for every table, so each monitor run has its own.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Looks up the client and either creates its record or folds the sighting into it.
    pub fn observe(&mut self, observation: Observation) -> &PresenceRecord {
        self.events_applied = self.events_applied.saturating_add(1);

        self.clients
            .entry(observation.mac)
            .and_modify(|record| record.record_sighting(observation.timestamp))
            .or_insert_with(|| PresenceRecord::first_sighting(observation.timestamp))
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&PresenceRecord> {
        self.clients.get(mac)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Total observations applied over the table's lifetime, flushes included.
    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            table_id: self.id,
            taken_at: Utc::now(),
            clients: self
                .clients
                .iter()
                .map(|(mac, record)| (*mac, *record))
                .collect(),
        }
    }

    /// Copies the table and applies `policy` in one step.
    pub fn flush(&mut self, policy: FlushPolicy) -> PresenceSnapshot {
        let snapshot = self.snapshot();
        if policy == FlushPolicy::ClearOnFlush {
            self.clients.clear();
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn mac(raw: &str) -> MacAddress {
        raw.parse().unwrap()
    }

    #[test]
    fn first_sighting_creates_record_with_count_one() {
        let mut table = PresenceTable::new();
        let device = mac("AA:BB:CC:11:22:33");
        assert!(table.get(&device).is_none());

        table.observe(Observation::new(device, at(42)));

        assert_eq!(
            table.get(&device),
            Some(&PresenceRecord {
                first_seen: at(42),
                last_seen: at(42),
                times_seen: 1,
            })
        );
    }

    #[test]
    fn repeated_sightings_track_first_last_and_count() {
        let mut table = PresenceTable::new();
        let device = mac("AA:BB:CC:11:22:33");

        for secs in [0, 5, 9] {
            table.observe(Observation::new(device, at(secs)));
        }

        let record = table.get(&device).unwrap();
        assert_eq!(record.first_seen, at(0));
        assert_eq!(record.last_seen, at(9));
        assert_eq!(record.times_seen, 3);
        assert_eq!(table.len(), 1);
        assert_eq!(table.events_applied(), 3);
    }

    #[test]
    fn times_seen_never_decreases() {
        let mut table = PresenceTable::new();
        let device = mac("00:11:22:33:44:55");
        let mut previous = 0;

        for secs in [10, 3, 7, 7, 1, 20] {
            let count = table.observe(Observation::new(device, at(secs))).times_seen;
            assert_eq!(count, previous + 1);
            previous = count;
        }
    }

    #[test]
    fn out_of_order_sighting_becomes_last_seen() {
        let mut table = PresenceTable::new();
        let device = mac("00:11:22:33:44:55");

        table.observe(Observation::new(device, at(10)));
        table.observe(Observation::new(device, at(20)));
        table.observe(Observation::new(device, at(15)));

        let record = table.get(&device).unwrap();
        assert_eq!(record.first_seen, at(10));
        assert_eq!(record.last_seen, at(15));
        assert_eq!(record.times_seen, 3);
    }

    #[test]
    fn sighting_before_first_seen_keeps_first_le_last() {
        let mut table = PresenceTable::new();
        let device = mac("00:11:22:33:44:55");

        table.observe(Observation::new(device, at(10)));
        table.observe(Observation::new(device, at(4)));

        let record = table.get(&device).unwrap();
        assert_eq!(record.first_seen, at(4));
        assert_eq!(record.last_seen, at(4));
        assert!(record.first_seen <= record.last_seen);
    }

    #[test]
    fn snapshot_lists_exactly_the_table_contents() {
        let mut table = PresenceTable::new();
        let a = mac("00:00:00:00:00:0a");
        let b = mac("00:00:00:00:00:0b");
        table.observe(Observation::new(b, at(1)));
        table.observe(Observation::new(a, at(2)));
        table.observe(Observation::new(b, at(3)));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), table.len());
        assert_eq!(snapshot.clients.keys().copied().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(snapshot.get(&b).unwrap().times_seen, 2);
        assert_eq!(snapshot.total_sightings(), 3);
        assert_eq!(snapshot.table_id, table.id());
        assert_ne!(PresenceTable::new().id(), table.id());
    }

    #[test]
    fn clear_on_flush_empties_table() {
        let mut table = PresenceTable::new();
        let device = mac("00:11:22:33:44:55");
        table.observe(Observation::new(device, at(1)));

        let flushed = table.flush(FlushPolicy::ClearOnFlush);
        assert_eq!(flushed.len(), 1);
        assert!(table.is_empty());

        table.observe(Observation::new(device, at(5)));
        assert_eq!(table.get(&device).unwrap().times_seen, 1);
        assert_eq!(table.get(&device).unwrap().first_seen, at(5));
    }

    #[test]
    fn retain_on_flush_keeps_accumulating() {
        let mut table = PresenceTable::new();
        let device = mac("00:11:22:33:44:55");
        table.observe(Observation::new(device, at(1)));

        let flushed = table.flush(FlushPolicy::RetainOnFlush);
        assert_eq!(flushed.get(&device).unwrap().times_seen, 1);
        assert_eq!(table.len(), 1);

        table.observe(Observation::new(device, at(5)));
        let record = table.get(&device).unwrap();
        assert_eq!(record.times_seen, 2);
        assert_eq!(record.first_seen, at(1));
        assert_eq!(flushed.get(&device).unwrap().times_seen, 1);
    }
}

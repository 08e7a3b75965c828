use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_cause, parse_datetime, parse_mac, parse_policy, to_i64, to_u64},
    models::{ClientTotals, FlushRecord},
};
use crate::models::{FlushBatch, FlushPolicy, MacAddress, PresenceRecord};

// Fixed-width UTC timestamps so TEXT comparison in MIN/MAX matches time order.
fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// Clear-on-flush batches are disjoint, so each one adds in full.
const UPSERT_CLIENT_DISJOINT: &str = "INSERT INTO clients (mac, first_seen, last_seen, times_seen, seen_secs, flush_count)
     VALUES (?1, ?2, ?3, ?4, ?5, 1)
     ON CONFLICT(mac) DO UPDATE SET
         first_seen = MIN(clients.first_seen, excluded.first_seen),
         last_seen = MAX(clients.last_seen, excluded.last_seen),
         times_seen = clients.times_seen + excluded.times_seen,
         seen_secs = clients.seen_secs + excluded.seen_secs,
         flush_count = clients.flush_count + 1";

// A retained batch repeats everything its table already handed over, so only
// the growth since that table's previous batch is added. A batch from another
// table (a later run) adds in full.
const UPSERT_CLIENT_RETAINED: &str = "INSERT INTO clients (mac, first_seen, last_seen, times_seen, seen_secs, flush_count,
                          retained_table, retained_times_seen, retained_seen_secs)
     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?4, ?5)
     ON CONFLICT(mac) DO UPDATE SET
         first_seen = MIN(clients.first_seen, excluded.first_seen),
         last_seen = MAX(clients.last_seen, excluded.last_seen),
         times_seen = clients.times_seen + excluded.times_seen
             - CASE WHEN clients.retained_table = excluded.retained_table
                    THEN clients.retained_times_seen ELSE 0 END,
         seen_secs = clients.seen_secs + excluded.seen_secs
             - CASE WHEN clients.retained_table = excluded.retained_table
                    THEN clients.retained_seen_secs ELSE 0 END,
         flush_count = clients.flush_count + 1,
         retained_table = excluded.retained_table,
         retained_times_seen = excluded.retained_times_seen,
         retained_seen_secs = excluded.retained_seen_secs";

fn row_to_flush(row: &Row) -> Result<FlushRecord> {
    let cause: String = row.get("cause")?;
    let policy: String = row.get("policy")?;
    let flushed_at: String = row.get("flushed_at")?;
    let snapshot_taken_at: String = row.get("snapshot_taken_at")?;
    let client_count: i64 = row.get("client_count")?;

    Ok(FlushRecord {
        id: row.get("id")?,
        table_id: row.get("table_id")?,
        cause: parse_cause(&cause)?,
        policy: parse_policy(&policy)?,
        flushed_at: parse_datetime(&flushed_at, "flushed_at")?,
        snapshot_taken_at: parse_datetime(&snapshot_taken_at, "snapshot_taken_at")?,
        client_count: to_u64(client_count, "client_count")?,
    })
}

fn row_to_client(row: &Row) -> Result<ClientTotals> {
    let mac: String = row.get("mac")?;
    let first_seen: String = row.get("first_seen")?;
    let last_seen: String = row.get("last_seen")?;
    let times_seen: i64 = row.get("times_seen")?;
    let seen_secs: i64 = row.get("seen_secs")?;
    let flush_count: i64 = row.get("flush_count")?;

    Ok(ClientTotals {
        mac: parse_mac(&mac)?,
        first_seen: parse_datetime(&first_seen, "first_seen")?,
        last_seen: parse_datetime(&last_seen, "last_seen")?,
        times_seen: to_u64(times_seen, "times_seen")?,
        seen_secs: to_u64(seen_secs, "seen_secs")?,
        flush_count: to_u64(flush_count, "flush_count")?,
    })
}

impl Database {
    /// Stores the batch, its sightings and the per-client totals in one transaction.
    pub async fn insert_flush_batch(&self, batch: &FlushBatch) -> Result<()> {
        let record = batch.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open flush transaction")?;

            let table_id = record.snapshot.table_id.to_string();
            tx.execute(
                "INSERT INTO flushes (id, table_id, cause, policy, flushed_at, snapshot_taken_at, client_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    table_id,
                    record.cause.as_str(),
                    record.policy.as_str(),
                    format_datetime(&record.flushed_at),
                    format_datetime(&record.snapshot.taken_at),
                    to_i64(record.len() as u64, "client_count")?,
                ],
            )
            .context("failed to insert flush")?;

            {
                let mut insert_sighting = tx.prepare(
                    "INSERT INTO sightings (flush_id, mac, first_seen, last_seen, times_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                let mut upsert_client = tx.prepare(match record.policy {
                    FlushPolicy::ClearOnFlush => UPSERT_CLIENT_DISJOINT,
                    FlushPolicy::RetainOnFlush => UPSERT_CLIENT_RETAINED,
                })?;

                let flush_id = record.id.to_string();
                for (mac, presence) in &record.snapshot.clients {
                    let mac = mac.to_string();
                    let first_seen = format_datetime(&presence.first_seen);
                    let last_seen = format_datetime(&presence.last_seen);
                    let times_seen = to_i64(presence.times_seen, "times_seen")?;

                    insert_sighting
                        .execute(params![flush_id, mac, first_seen, last_seen, times_seen])
                        .with_context(|| format!("failed to insert sighting for {mac}"))?;
                    let updated = match record.policy {
                        FlushPolicy::ClearOnFlush => upsert_client.execute(params![
                            mac,
                            first_seen,
                            last_seen,
                            times_seen,
                            presence.seen_secs(),
                        ]),
                        FlushPolicy::RetainOnFlush => upsert_client.execute(params![
                            mac,
                            first_seen,
                            last_seen,
                            times_seen,
                            presence.seen_secs(),
                            table_id,
                        ]),
                    };
                    updated.with_context(|| format!("failed to update totals for {mac}"))?;
                }
            }

            tx.commit().context("failed to commit flush")?;
            Ok(())
        })
        .await
    }

    pub async fn list_flushes(&self) -> Result<Vec<FlushRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, table_id, cause, policy, flushed_at, snapshot_taken_at, client_count
                 FROM flushes
                 ORDER BY flushed_at ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut flushes = Vec::new();
            while let Some(row) = rows.next()? {
                flushes.push(row_to_flush(row)?);
            }
            Ok(flushes)
        })
        .await
    }

    pub async fn get_sightings_for_flush(
        &self,
        flush_id: &str,
    ) -> Result<Vec<(MacAddress, PresenceRecord)>> {
        let flush_id = flush_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT mac, first_seen, last_seen, times_seen
                 FROM sightings
                 WHERE flush_id = ?1
                 ORDER BY mac ASC",
            )?;

            let mut rows = stmt.query(params![flush_id])?;
            let mut sightings = Vec::new();
            while let Some(row) = rows.next()? {
                let mac: String = row.get(0)?;
                let first_seen: String = row.get(1)?;
                let last_seen: String = row.get(2)?;
                let times_seen: i64 = row.get(3)?;
                sightings.push((
                    parse_mac(&mac)?,
                    PresenceRecord {
                        first_seen: parse_datetime(&first_seen, "first_seen")?,
                        last_seen: parse_datetime(&last_seen, "last_seen")?,
                        times_seen: to_u64(times_seen, "times_seen")?,
                    },
                ));
            }
            Ok(sightings)
        })
        .await
    }

    pub async fn get_client_totals(&self, mac: &MacAddress) -> Result<Option<ClientTotals>> {
        let mac = mac.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT mac, first_seen, last_seen, times_seen, seen_secs, flush_count
                 FROM clients
                 WHERE mac = ?1",
            )?;

            let mut rows = stmt.query(params![mac])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_client(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn count_clients(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: Option<i64> = conn
                .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
                .optional()?;
            to_u64(count.unwrap_or(0), "client count")
        })
        .await
    }
}

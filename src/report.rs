//! Human-readable listing of the presence table.

use std::fmt::Write as _;
use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};

use crate::models::PresenceSnapshot;
use crate::presence::PresenceHandle;

pub fn render_snapshot(snapshot: &PresenceSnapshot) -> String {
    let mut out = String::new();

    for (mac, record) in &snapshot.clients {
        let _ = write!(
            out,
            "MAC {mac} {{\n\tFirst seen: {}\n\tLast seen:  {}\n\tTimes seen: {}\n}}\n",
            record.first_seen, record.last_seen, record.times_seen
        );
    }
    let _ = writeln!(out, "Total: {} clients", snapshot.len());

    out
}

/// Writes snapshot reports to a shared output (stdout in the binary).
#[derive(Clone)]
pub struct SnapshotReporter {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SnapshotReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Asks the ingestion loop for a snapshot and writes it. Returns the
    /// number of clients listed.
    pub async fn report(&self, presence: &PresenceHandle) -> Result<usize> {
        let snapshot = presence
            .snapshot()
            .await
            .context("failed to fetch snapshot for report")?;
        self.write_snapshot(&snapshot)
    }

    pub fn write_snapshot(&self, snapshot: &PresenceSnapshot) -> Result<usize> {
        let rendered = render_snapshot(snapshot);
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("report output lock poisoned"))?;
        out.write_all(rendered.as_bytes())
            .context("failed to write snapshot report")?;
        out.flush().context("failed to flush snapshot report")?;
        Ok(snapshot.len())
    }
}

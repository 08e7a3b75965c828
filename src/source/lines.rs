use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::models::{MacAddress, Observation};
use crate::queue::EventSender;

use super::ObservationSource;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineStats {
    pub lines: u64,
    pub forwarded: u64,
    pub skipped: u64,
    pub dropped: u64,
}

/// Parses `SECONDS[.FRACTION]` epoch time without going through a float.
pub fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = match raw.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (raw, ""),
    };
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let secs: i64 = secs.parse().ok()?;
    let mut nanos: u32 = 0;
    for (i, digit) in frac.bytes().take(9).enumerate() {
        nanos += u32::from(digit - b'0') * 10u32.pow(8 - i as u32);
    }

    DateTime::from_timestamp(secs, nanos)
}

/// Parses one `MAC<whitespace>EPOCH` line. Repeated fields (`a,b`) use the first value.
pub fn parse_line(line: &str) -> Option<Observation> {
    let mut fields = line.split_whitespace();
    let mac_field = fields.next()?;
    let time_field = fields.next()?;

    let mac: MacAddress = mac_field.split(',').next()?.parse().ok()?;
    let timestamp = parse_epoch(time_field.split(',').next()?)?;
    Some(Observation::new(mac, timestamp))
}

/// Forwards parsed lines from `reader` into the event queue until EOF,
/// cancellation, or the queue closing.
pub async fn pump_lines<R>(
    reader: R,
    events: &EventSender,
    cancel_token: &CancellationToken,
) -> Result<LineStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = LineStats::default();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read observation line")?,
            _ = cancel_token.cancelled() => break,
        };
        let Some(line) = line else {
            break;
        };

        stats.lines += 1;
        if line.trim().is_empty() {
            continue;
        }

        let Some(observation) = parse_line(&line) else {
            stats.skipped += 1;
            log_debug!("skipping unparseable line: {line:?}");
            continue;
        };

        let sent = tokio::select! {
            sent = events.send(observation) => sent,
            _ = cancel_token.cancelled() => break,
        };
        match sent {
            Ok(true) => stats.forwarded += 1,
            Ok(false) => stats.dropped += 1,
            Err(Error::QueueClosed) => {
                log_warn!("event queue closed; stopping line reader");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    log_info!(
        "line reader finished: {} lines, {} forwarded, {} dropped, {} skipped",
        stats.lines,
        stats.forwarded,
        stats.dropped,
        stats.skipped
    );
    Ok(stats)
}

/// Observations read from any buffered async reader.
pub struct LineSource<R> {
    reader: R,
    label: String,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            label: label.into(),
        }
    }
}

#[async_trait]
impl<R> ObservationSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn run(self: Box<Self>, events: EventSender, cancel_token: CancellationToken) -> Result<()> {
        let this = *self;
        pump_lines(this.reader, &events, &cancel_token).await?;
        Ok(())
    }
}

/// Replays a plain-text event log.
pub struct EventLogSource {
    path: PathBuf,
}

impl EventLogSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ObservationSource for EventLogSource {
    fn describe(&self) -> String {
        format!("event log {}", self.path.display())
    }

    async fn run(self: Box<Self>, events: EventSender, cancel_token: CancellationToken) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("failed to open event log {}", self.path.display()))?;
        pump_lines(BufReader::new(file), &events, &cancel_token).await?;
        Ok(())
    }
}

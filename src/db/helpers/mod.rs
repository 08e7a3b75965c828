use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{FlushCause, FlushPolicy, MacAddress};

/// Presence counters are `u64` in memory but SQLite stores signed integers.
pub fn to_i64(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{column} of {value} is too large to store"))
}

pub fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("stored {column} is negative ({value})"))
}

/// Reads back a timestamp written by the flush repository.
pub fn parse_datetime(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("stored {column} '{value}' is not an RFC 3339 timestamp"))
}

pub fn parse_mac(value: &str) -> Result<MacAddress> {
    value
        .parse()
        .with_context(|| format!("invalid mac address '{value}'"))
}

pub fn parse_cause(value: &str) -> Result<FlushCause> {
    match value {
        "Scheduled" => Ok(FlushCause::Scheduled),
        "Trigger" => Ok(FlushCause::Trigger),
        "Shutdown" => Ok(FlushCause::Shutdown),
        other => Err(anyhow!("unknown flush cause {other}")),
    }
}

pub fn parse_policy(value: &str) -> Result<FlushPolicy> {
    match value {
        "clear-on-flush" => Ok(FlushPolicy::ClearOnFlush),
        "retain-on-flush" => Ok(FlushPolicy::RetainOnFlush),
        other => Err(anyhow!("unknown flush policy {other}")),
    }
}

//! Command-line flags and the validated monitor configuration built from them.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{warn, LevelFilter};

use crate::error::{Error, Result};
use crate::flush::{check_flush_interval, DEFAULT_FLUSH_INTERVAL_SECS};
use crate::models::FlushPolicy;
use crate::queue::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use crate::source::{interface_exists, CaptureTarget, DEFAULT_DISPLAY_FILTER};
use crate::utils::LogSettings;

pub const DEFAULT_INTERFACE: &str = "mon0";
pub const DEFAULT_DATABASE: &str = "wiith.sqlite3";

#[derive(Debug, Clone, Parser)]
#[command(name = "wiith", version, about = "Who is in the house: passive presence monitor for nearby WiFi clients")]
pub struct Cli {
    /// Monitor-mode interface to capture on
    #[arg(short = 'i', long, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Replay a capture file instead of capturing live
    #[arg(short = 'p', long)]
    pub pcap: Option<PathBuf>,

    /// Replay a plain-text `MAC TIMESTAMP` event log
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Seconds between scheduled flushes (at most one week)
    #[arg(short = 'f', long, default_value_t = DEFAULT_FLUSH_INTERVAL_SECS)]
    pub flush_interval: u64,

    /// What a flush does to the in-memory table
    #[arg(long, value_enum, default_value_t = FlushPolicy::ClearOnFlush)]
    pub flush_policy: FlushPolicy,

    /// Bounded capacity of the event queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// What the capture side does when the event queue is full
    #[arg(long, value_enum, default_value_t = OverflowPolicy::Block)]
    pub overflow: OverflowPolicy,

    /// SQLite database that receives flushed snapshots
    #[arg(long, default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Append flushed snapshots to a JSON lines file instead of SQLite
    #[arg(long)]
    pub jsonl: Option<PathBuf>,

    /// Persist the table one last time on shutdown
    #[arg(long)]
    pub flush_on_exit: bool,

    /// tshark executable
    #[arg(long, default_value = "tshark")]
    pub tshark: PathBuf,

    /// tshark display filter applied to captured frames
    #[arg(long, default_value = DEFAULT_DISPLAY_FILTER)]
    pub display_filter: String,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(short = 't', long, default_value = "info")]
    pub log_level: LevelFilter,

    /// Write logs to <DIR>/wiith.log instead of stderr
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            level: self.log_level,
            log_dir: self.log_dir.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub target: CaptureTarget,
    pub flush_interval: Duration,
    pub flush_policy: FlushPolicy,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub database: PathBuf,
    pub jsonl: Option<PathBuf>,
    pub flush_on_exit: bool,
    pub tshark: PathBuf,
    pub display_filter: String,
    pub logging: LogSettings,
}

impl MonitorConfig {
    /// Validates the flags. Nothing is started when this fails.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let flush_interval = Duration::from_secs(cli.flush_interval);
        check_flush_interval(flush_interval)?;
        if cli.queue_capacity == 0 {
            return Err(Error::Configuration(
                "queue capacity must be at least 1".into(),
            ));
        }

        let target = resolve_target(cli)?;
        warn_if_root();

        Ok(Self {
            target,
            flush_interval,
            flush_policy: cli.flush_policy,
            queue_capacity: cli.queue_capacity,
            overflow: cli.overflow,
            database: cli.database.clone(),
            jsonl: cli.jsonl.clone(),
            flush_on_exit: cli.flush_on_exit,
            tshark: cli.tshark.clone(),
            display_filter: cli.display_filter.clone(),
            logging: cli.log_settings(),
        })
    }
}

/// Event log wins over a capture file, which wins over the live interface.
fn resolve_target(cli: &Cli) -> Result<CaptureTarget> {
    if let Some(path) = &cli.events {
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "event log {} does not exist",
                path.display()
            )));
        }
        return Ok(CaptureTarget::EventLog { path: path.clone() });
    }

    if let Some(path) = &cli.pcap {
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "capture file {} does not exist",
                path.display()
            )));
        }
        return Ok(CaptureTarget::Pcap { path: path.clone() });
    }

    if cli.interface.is_empty() || !interface_exists(&cli.interface) {
        return Err(Error::Configuration(format!(
            "interface {:?} does not exist and no capture file was given",
            cli.interface
        )));
    }
    Ok(CaptureTarget::Live {
        interface: cli.interface.clone(),
    })
}

fn warn_if_root() {
    let user = std::env::var("USER").or_else(|_| std::env::var("LOGNAME"));
    if matches!(user.as_deref(), Ok("root")) {
        warn!("running as root; consider granting capture capabilities to tshark instead");
    }
}

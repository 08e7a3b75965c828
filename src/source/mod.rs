//! Producers of observation events.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::queue::EventSender;

pub mod iface;
pub mod lines;
pub mod tshark;

pub use iface::interface_exists;
pub use lines::{parse_epoch, parse_line, pump_lines, EventLogSource, LineSource, LineStats};
pub use tshark::{TsharkSource, DEFAULT_DISPLAY_FILTER};

/// Where observations come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    /// Live capture on a monitor-mode interface.
    Live { interface: String },
    /// Offline replay of a capture file through tshark.
    Pcap { path: PathBuf },
    /// Offline replay of a plain-text `MAC TIMESTAMP` log.
    EventLog { path: PathBuf },
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureTarget::Live { interface } => write!(f, "interface {interface}"),
            CaptureTarget::Pcap { path } => write!(f, "capture file {}", path.display()),
            CaptureTarget::EventLog { path } => write!(f, "event log {}", path.display()),
        }
    }
}

/// Runs until the stream ends (`Ok`), fails (`Err`), or `cancel_token` fires.
/// Dropping `events` on return is what closes the event queue.
#[async_trait]
pub trait ObservationSource: Send {
    fn describe(&self) -> String;

    async fn run(self: Box<Self>, events: EventSender, cancel_token: CancellationToken) -> Result<()>;
}

/// Builds the source for `target`; capture targets go through tshark.
pub fn build_source(
    target: &CaptureTarget,
    tshark_program: PathBuf,
    display_filter: String,
) -> Box<dyn ObservationSource> {
    match target {
        CaptureTarget::EventLog { path } => Box::new(EventLogSource::new(path.clone())),
        CaptureTarget::Live { .. } | CaptureTarget::Pcap { .. } => Box::new(TsharkSource::new(
            tshark_program,
            target.clone(),
            display_filter,
        )),
    }
}

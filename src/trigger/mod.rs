//! Administrative requests delivered from outside the process.

use std::fmt;

use async_trait::async_trait;

pub mod channel;
pub mod controller;
#[cfg(unix)]
pub mod signals;

pub use channel::ChannelTriggers;
pub use controller::{spawn_trigger_controller, TriggerStats};
#[cfg(unix)]
pub use signals::SignalTriggers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Same operation as a scheduled flush.
    Flush,
    /// Print the current table without touching it.
    Report,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Flush => f.write_str("flush"),
            Trigger::Report => f.write_str("report"),
        }
    }
}

/// Anything that can deliver flush/report triggers: OS signals, a control
/// socket, an in-process channel.
#[async_trait]
pub trait TriggerSource: Send {
    /// Waits for the next trigger. `None` means no more triggers will arrive.
    async fn next_trigger(&mut self) -> Option<Trigger>;
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use tokio::signal::unix::{signal, Signal, SignalKind};

use super::{Trigger, TriggerSource};

/// SIGUSR1 flushes, SIGUSR2 prints the current clients.
pub struct SignalTriggers {
    flush: Signal,
    report: Signal,
}

impl SignalTriggers {
    pub fn new() -> Result<Self> {
        Ok(Self {
            flush: signal(SignalKind::user_defined1()).context("failed to listen for SIGUSR1")?,
            report: signal(SignalKind::user_defined2()).context("failed to listen for SIGUSR2")?,
        })
    }
}

#[async_trait]
impl TriggerSource for SignalTriggers {
    async fn next_trigger(&mut self) -> Option<Trigger> {
        let trigger = tokio::select! {
            received = self.flush.recv() => received.map(|_| Trigger::Flush),
            received = self.report.recv() => received.map(|_| Trigger::Report),
        };
        if let Some(trigger) = trigger {
            info!("Caught signal for {trigger}");
        }
        trigger
    }
}

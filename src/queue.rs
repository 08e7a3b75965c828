//! Bounded hand-off between an observation source and the ingestion loop.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use clap::ValueEnum;
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Error, Result};
use crate::models::Observation;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

const DROP_WARN_EVERY: u64 = 100;

/// What a producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for the ingestion loop to make room.
    #[default]
    Block,
    /// Discard the incoming event and count it.
    #[value(name = "drop")]
    DropNewest,
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Observation>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

pub struct EventReceiver {
    rx: mpsc::Receiver<Observation>,
    dropped: Arc<AtomicU64>,
}

/// Creates the event queue. `capacity` must be at least 1.
pub fn event_queue(capacity: usize, policy: OverflowPolicy) -> Result<(EventSender, EventReceiver)> {
    if capacity == 0 {
        return Err(Error::Configuration(
            "event queue capacity must be at least 1".into(),
        ));
    }

    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    Ok((
        EventSender {
            tx,
            policy,
            dropped: Arc::clone(&dropped),
        },
        EventReceiver { rx, dropped },
    ))
}

impl EventSender {
    /// Hands an observation to the ingestion loop.
    ///
    /// Returns `Ok(true)` when the event was queued and `Ok(false)` when it was
    /// dropped under [`OverflowPolicy::DropNewest`].
    pub async fn send(&self, observation: Observation) -> Result<bool> {
        match self.policy {
            OverflowPolicy::Block => {
                self.tx
                    .send(observation)
                    .await
                    .map_err(|_| Error::QueueClosed)?;
                Ok(true)
            }
            OverflowPolicy::DropNewest => match self.tx.try_send(observation) {
                Ok(()) => Ok(true),
                Err(TrySendError::Full(dropped)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if total == 1 || total % DROP_WARN_EVERY == 0 {
                        warn!(
                            "event queue full, dropped observation of {} ({} dropped so far)",
                            dropped.mac, total
                        );
                    }
                    Ok(false)
                }
                Err(TrySendError::Closed(_)) => Err(Error::QueueClosed),
            },
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<Observation> {
        self.rx.recv().await
    }

    /// Refuses further sends; already buffered events can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

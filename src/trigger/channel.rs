use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Trigger, TriggerSource};

/// Triggers fed through an in-process channel.
pub struct ChannelTriggers {
    rx: mpsc::Receiver<Trigger>,
}

impl ChannelTriggers {
    pub fn new(capacity: usize) -> (mpsc::Sender<Trigger>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl TriggerSource for ChannelTriggers {
    async fn next_trigger(&mut self) -> Option<Trigger> {
        self.rx.recv().await
    }
}

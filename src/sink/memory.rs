use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::FlushBatch;

use super::PersistenceSink;

/// Keeps every batch in memory. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<FlushBatch>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `persist` calls fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<FlushBatch> {
        match self.batches.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.batches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn persist(&self, batch: &FlushBatch) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory sink configured to fail");
        }

        let mut guard = match self.batches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(batch.clone());
        Ok(())
    }
}

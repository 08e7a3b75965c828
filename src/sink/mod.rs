//! Durable destinations for flushed presence snapshots.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::FlushBatch;

pub mod jsonl;
pub mod memory;
pub mod sqlite;

pub use jsonl::JsonlSink;
pub use memory::MemorySink;

/// Accepts one batch per flush. An error is recoverable: the caller logs it and
/// carries on with the next flush.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn persist(&self, batch: &FlushBatch) -> Result<()>;
}

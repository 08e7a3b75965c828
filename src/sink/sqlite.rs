use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::db::Database;
use crate::models::FlushBatch;

use super::PersistenceSink;

#[async_trait]
impl PersistenceSink for Database {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn persist(&self, batch: &FlushBatch) -> Result<()> {
        self.insert_flush_batch(batch)
            .await
            .with_context(|| format!("failed to store flush {} in {}", batch.id, self.path().display()))
    }
}

//! Error-processing main step: persist the failure context

use crate::pipeline::{category, FailedRecord, PipelineResult, Processing};
use crate::repo::DeadLetterWriter;
use async_trait::async_trait;
use std::sync::Arc;

/// Writes every failed record to the dead-letter store.
pub struct DeadLetterProcessor {
    writer: Arc<dyn DeadLetterWriter>,
}

impl DeadLetterProcessor {
    /// Build the processor over its dead-letter repository.
    pub fn new(writer: Arc<dyn DeadLetterWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Processing<FailedRecord> for DeadLetterProcessor {
    async fn process(&self, failed: &FailedRecord) -> PipelineResult {
        self.writer
            .write(failed)
            .await
            .map_err(|err| err.or_category(category::GENERIC).context("failed to write dead letter"))
    }
}

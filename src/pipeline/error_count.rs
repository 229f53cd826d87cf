//! Error counter terminal processing

use crate::pipeline::{FailedRecord, PipelineResult, Processing};
use async_trait::async_trait;
use prometheus::{IntCounterVec, Opts, Registry};

/// Counts failed records by category.
///
/// Registered as `error_processing_error_total{category}`; a record whose
/// error carries no category is counted under the stable `empty_category`
/// label. Runs as one branch of the parallel error stack and never fails.
pub struct ErrorCount {
    counter: IntCounterVec,
}

impl ErrorCount {
    /// Register the counter with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let opts = Opts::new("processing_error_total", "Error counter by category.")
            .namespace("error".to_string());

        let counter = IntCounterVec::new(opts, &["category"])?;
        registry.register(Box::new(counter.clone()))?;

        Ok(Self { counter })
    }
}

#[async_trait]
impl Processing<FailedRecord> for ErrorCount {
    async fn process(&self, failed: &FailedRecord) -> PipelineResult {
        self.counter
            .with_label_values(&[failed.error.metric_category()])
            .inc();

        Ok(())
    }
}

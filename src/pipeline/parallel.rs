//! Parallel fan-out decorator

use crate::pipeline::{PipelineResult, Processing};
use async_trait::async_trait;
use futures::future::try_join_all;

/// Runs every inner processing concurrently over the same payload and
/// returns the first error. Remaining branches are cancelled by drop once
/// one of them fails, so all branches observe the same lifetime.
pub struct Parallel<P> {
    procs: Vec<Box<dyn Processing<P>>>,
}

impl<P> Parallel<P>
where
    P: Send + Sync,
{
    /// Compose the given processings into one parallel step.
    pub fn new(procs: Vec<Box<dyn Processing<P>>>) -> Self {
        Self { procs }
    }
}

#[async_trait]
impl<P> Processing<P> for Parallel<P>
where
    P: Send + Sync,
{
    async fn process(&self, payload: &P) -> PipelineResult {
        try_join_all(self.procs.iter().map(|proc| proc.process(payload))).await?;

        Ok(())
    }
}

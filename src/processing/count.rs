//! Arrival counter decorator

use crate::entity::Event;
use crate::pipeline::{PipelineResult, Processing};
use async_trait::async_trait;
use prometheus::{IntCounterVec, Opts, Registry};

/// Counts every arriving event by name, success or failure alike.
///
/// Registered as `processing_data_total{name}`; the increment happens after
/// the inner step returns so an inner panic converted further out still
/// counts the arrival.
pub struct CountData<T> {
    inner: T,
    counter: IntCounterVec,
}

impl<T> CountData<T> {
    /// Wrap the inner processing, registering the counter with `registry`.
    pub fn new(inner: T, registry: &Registry) -> Result<Self, prometheus::Error> {
        let opts = Opts::new("data_total", "Data counter by event name.")
            .namespace("processing".to_string());

        let counter = IntCounterVec::new(opts, &["name"])?;
        registry.register(Box::new(counter.clone()))?;

        Ok(Self { inner, counter })
    }
}

#[async_trait]
impl<T> Processing<Event> for CountData<T>
where
    T: Processing<Event>,
{
    async fn process(&self, event: &Event) -> PipelineResult {
        let result = self.inner.process(event).await;

        self.counter.with_label_values(&[event.name.as_str()]).inc();

        result
    }
}

//! Processing duration histogram decorator

use crate::pipeline::{PipelineResult, Processing};
use async_trait::async_trait;
use prometheus::{HistogramOpts, HistogramVec, Registry};
use std::time::Instant;

/// Histogram buckets in milliseconds used when none are supplied.
pub const DEFAULT_BUCKETS: &[f64] = &[
    10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0,
];

/// Observes how long the inner processing takes, labelled by outcome.
///
/// The metric is registered as
/// `<namespace>_processing_duration_milliseconds{failed="true"|"false"}`;
/// the main stack uses an empty namespace, the error stack `"error"`.
pub struct DurationMetrics<T> {
    inner: T,
    histogram: HistogramVec,
}

impl<T> DurationMetrics<T> {
    /// Wrap the inner processing, registering the histogram with `registry`.
    pub fn new(
        inner: T,
        registry: &Registry,
        namespace: &str,
        buckets: Option<Vec<f64>>,
    ) -> Result<Self, prometheus::Error> {
        let opts = HistogramOpts::new(
            "processing_duration_milliseconds",
            "Time taken to process payload.",
        )
        .namespace(namespace.to_string())
        .buckets(buckets.unwrap_or_else(|| DEFAULT_BUCKETS.to_vec()));

        let histogram = HistogramVec::new(opts, &["failed"])?;
        registry.register(Box::new(histogram.clone()))?;

        Ok(Self { inner, histogram })
    }
}

#[async_trait]
impl<P, T> Processing<P> for DurationMetrics<T>
where
    P: Send + Sync,
    T: Processing<P>,
{
    async fn process(&self, payload: &P) -> PipelineResult {
        let start = Instant::now();

        let result = self.inner.process(payload).await;

        let millis = start.elapsed().as_secs_f64() * 1000.0;
        let failed = if result.is_err() { "true" } else { "false" };
        self.histogram.with_label_values(&[failed]).observe(millis);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{category, PipelineError};
    use anyhow::anyhow;

    struct Outcome {
        fail: bool,
    }

    #[async_trait]
    impl Processing<()> for Outcome {
        async fn process(&self, _payload: &()) -> PipelineResult {
            if self.fail {
                return Err(PipelineError::new(category::UNKNOWN, anyhow!("failed")));
            }
            Ok(())
        }
    }

    fn render(registry: &Registry) -> String {
        let encoder = prometheus::TextEncoder::new();
        encoder.encode_to_string(&registry.gather()).expect("text encoding")
    }

    #[tokio::test]
    async fn observes_success_and_failure_separately() {
        let registry = Registry::new();

        let success = DurationMetrics::new(Outcome { fail: false }, &registry, "test", None)
            .expect("histogram registration");
        for _ in 0..3 {
            success.process(&()).await.unwrap();
        }

        let registry_err = Registry::new();
        let failure = DurationMetrics::new(Outcome { fail: true }, &registry_err, "test", None)
            .expect("histogram registration");
        failure.process(&()).await.unwrap_err();

        let rendered = render(&registry);
        assert!(
            rendered.contains("test_processing_duration_milliseconds_count{failed=\"false\"} 3"),
            "unexpected exposition:\n{rendered}",
        );
        assert!(!rendered.contains("failed=\"true\""));

        let rendered = render(&registry_err);
        assert!(
            rendered.contains("test_processing_duration_milliseconds_count{failed=\"true\"} 1"),
            "unexpected exposition:\n{rendered}",
        );
    }

    #[tokio::test]
    async fn uses_namespaced_metric_name() {
        let registry = Registry::new();
        let metrics = DurationMetrics::new(Outcome { fail: false }, &registry, "error", None)
            .expect("histogram registration");

        metrics.process(&()).await.unwrap();

        let rendered = render(&registry);
        assert!(rendered.contains("error_processing_duration_milliseconds_bucket"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();

        DurationMetrics::new(Outcome { fail: false }, &registry, "test", None)
            .expect("first registration");
        let second = DurationMetrics::new(Outcome { fail: false }, &registry, "test", None);
        assert!(second.is_err());
    }
}

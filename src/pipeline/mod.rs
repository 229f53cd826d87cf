//! Generic processing pipeline
//!
//! The pipeline is built from one capability: [`Processing<P>`], an async
//! step that either fully handles a payload or returns a categorized
//! [`PipelineError`]. Decorators are `Processing<P> → Processing<P>`
//! transformations and compose freely; ordering is meaningful, the
//! outermost decorator runs first.
//!
//! The main stack processes decoded [`Event`](crate::entity::Event)s; the
//! error stack is the same capability instantiated at `P =`
//! [`FailedRecord`], the record context bundled with the error that stopped
//! it.

pub mod duration;
pub mod error;
pub mod error_count;
pub mod panic_guard;
pub mod parallel;
pub mod retry;
pub mod runner;

pub use duration::DurationMetrics;
pub use error::{category, Input, PipelineError};
pub use error_count::ErrorCount;
pub use panic_guard::PanicGuard;
pub use parallel::Parallel;
pub use retry::{Retry, RetryConfig};
pub use runner::{OffsetCommitter, PipelineRunner};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result alias for pipeline steps.
pub type PipelineResult<T = ()> = Result<T, PipelineError>;

/// A single processing step over payloads of type `P`.
#[async_trait]
pub trait Processing<P>: Send + Sync
where
    P: Send + Sync,
{
    /// Fully handle one payload or explain why it could not be handled.
    async fn process(&self, payload: &P) -> PipelineResult;
}

#[async_trait]
impl<P, T> Processing<P> for Arc<T>
where
    P: Send + Sync,
    T: Processing<P> + ?Sized,
{
    async fn process(&self, payload: &P) -> PipelineResult {
        (**self).process(payload).await
    }
}

#[async_trait]
impl<P> Processing<P> for Box<dyn Processing<P>>
where
    P: Send + Sync,
{
    async fn process(&self, payload: &P) -> PipelineResult {
        (**self).process(payload).await
    }
}

/// Source coordinates and raw bytes of a consumed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
    /// Topic the record was consumed from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Record offset within the partition
    pub offset: i64,
    /// Broker timestamp of the record
    pub timestamp: DateTime<Utc>,
    /// Raw record value
    pub payload: Vec<u8>,
}

/// Payload of the error-processing pipeline: the record that failed plus
/// the error that stopped it.
#[derive(Debug)]
pub struct FailedRecord {
    /// The record being processed when the failure occurred
    pub record: RecordContext,
    /// The failure itself
    pub error: PipelineError,
}

//! Repository traits and their backend implementations
//!
//! The transforms talk to storage through three seams: the short-term host
//! cache, the projection writer and the dead-letter writer. Backends map
//! their failures onto pipeline categories and mark transport-level
//! failures retryable.

pub mod dlq;
pub mod s3;
pub mod valkey;

pub use dlq::S3DeadLetterWriter;
pub use s3::{ParallelProjectionWriter, S3ProjectionWriter};
pub use valkey::ValkeyHostStore;

use crate::entity::{HostState, Projection, ProjectionKind};
use crate::pipeline::{FailedRecord, PipelineResult};
use async_trait::async_trait;

/// Per-cluster keyed cache of host states with a cluster-wide TTL.
#[async_trait]
pub trait HostStateStore: Send + Sync {
    /// Upsert one host state under its cluster, refreshing the cluster TTL.
    async fn write_host_state(&self, state: &HostState) -> PipelineResult;

    /// All cached host states of a cluster, in no particular order.
    async fn get_host_states(&self, cluster_id: &str) -> PipelineResult<Vec<HostState>>;
}

/// Write-once store for projections.
#[async_trait]
pub trait ProjectionWriter: Send + Sync {
    /// Persist one projection under its deterministic key.
    async fn write(&self, kind: ProjectionKind, projection: &Projection) -> PipelineResult;
}

/// Store for the full context of records that could not be processed.
#[async_trait]
pub trait DeadLetterWriter: Send + Sync {
    /// Persist one failed record.
    async fn write(&self, failed: &FailedRecord) -> PipelineResult;
}

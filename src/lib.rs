//! Kafka-to-S3 exporter for assisted-installer telemetry events
//!
//! The crate consumes JSON events from a partitioned log, transforms them
//! into canonical anonymized projections and writes each projection into an
//! S3-compatible object store. Host-level events are not emitted directly:
//! they accumulate in a TTL'd Valkey cache and are embedded into subsequent
//! cluster-state projections. Records that cannot be processed are captured
//! with their full context in a dead-letter store, and operational health
//! is exposed as Prometheus metrics.
//!
//! # Example
//!
//! ```no_run
//! use ccx_exporter::config::Config;
//! use ccx_exporter::pipeline::{PipelineRunner, RetryConfig};
//! use ccx_exporter::processing::{DeadLetterProcessor, EventProcessor};
//! use ccx_exporter::repo::{S3DeadLetterWriter, S3ProjectionWriter, ValkeyHostStore};
//! use ccx_exporter::{factory, entity::Event};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load(None)?;
//! let registry = prometheus::Registry::new();
//! let shutdown = CancellationToken::new();
//!
//! let valkey = factory::create_valkey_client(&config.valkey).await?;
//! let host_store = Arc::new(ValkeyHostStore::new(valkey, config.valkey.ttl));
//!
//! let s3_conf = &config.output.s3[0];
//! let writer = Arc::new(S3ProjectionWriter::new(
//!     factory::create_s3_client(s3_conf).await,
//!     s3_conf.bucket.clone(),
//!     s3_conf.key_prefix.clone(),
//! ));
//!
//! let dlq_conf = &config.dead_letter_queue;
//! let dlq = Arc::new(S3DeadLetterWriter::new(
//!     factory::create_s3_client(dlq_conf).await,
//!     dlq_conf.bucket.clone(),
//!     dlq_conf.key_prefix.clone(),
//! ));
//!
//! let processing = factory::decorate_processing(
//!     EventProcessor::new(host_store, writer),
//!     &registry,
//!     RetryConfig::default(),
//!     shutdown.clone(),
//! )?;
//! let error_processing = factory::decorate_error_processing(
//!     DeadLetterProcessor::new(dlq),
//!     &registry,
//!     RetryConfig::default(),
//!     shutdown.clone(),
//! )?;
//!
//! let consumer = Arc::new(factory::create_kafka_consumer(&config.kafka)?);
//! let runner =
//!     PipelineRunner::<Event>::new(consumer, processing, error_processing, shutdown);
//! runner.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub use config::Config;
pub use entity::{Event, HostState, Payload, Projection, ProjectionKind};
pub use pipeline::{FailedRecord, PipelineError, Processing};

/// Typed configuration loading
pub mod config;

/// Domain entities
pub mod entity;

/// Client construction and pipeline assembly
pub mod factory;

/// Metrics exposition endpoint
pub mod metrics;

/// Generic processing pipeline and consumer driver
pub mod pipeline;

/// Event transforms and their decorators
pub mod processing;

/// Storage backends
pub mod repo;

/// Logging initialisation
pub mod telemetry;

/// Build provenance
pub mod version;

//! S3 projection writer

use crate::entity::{Projection, ProjectionKind};
use crate::pipeline::{category, PipelineError, PipelineResult};
use crate::repo::ProjectionWriter;
use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use futures::future::try_join_all;
use std::sync::Arc;

/// Writes projection payloads as NDJSON objects under
/// `<prefix><segment>/<YYYY-MM-DD>/<id>.ndjson`.
pub struct S3ProjectionWriter {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3ProjectionWriter {
    /// Build the writer for one bucket and key prefix.
    pub fn new(client: aws_sdk_s3::Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    // The part of the key after the final '/' must start with [0-9a-f].
    // Downstream consumers rely on it, so the contract is enforced here
    // even though callers only ever produce hex ids.
    fn compute_object_key(&self, kind: ProjectionKind, projection: &Projection) -> PipelineResult<String> {
        let starts_with_hex = projection
            .id
            .chars()
            .next()
            .is_some_and(|c| matches!(c, '0'..='9' | 'a'..='f'));

        if !starts_with_hex {
            return Err(PipelineError::new(
                category::S3_INVALID_KEY,
                anyhow!(
                    "projection id {:?} must start with a lowercase hex character",
                    projection.id
                ),
            ));
        }

        Ok(format!(
            "{}{}/{}/{}.ndjson",
            self.prefix,
            kind.key_segment(),
            projection.timestamp.format("%Y-%m-%d"),
            projection.id,
        ))
    }
}

#[async_trait]
impl ProjectionWriter for S3ProjectionWriter {
    async fn write(&self, kind: ProjectionKind, projection: &Projection) -> PipelineResult {
        let key = self.compute_object_key(kind, projection)?;

        let body = serde_json::to_vec(&projection.payload).map_err(|err| {
            PipelineError::new(category::S3_INTERNAL_ERROR, err)
                .context("failed to serialize projection")
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| classify(err, category::S3_CLIENT).context("failed to write in s3"))?;

        Ok(())
    }
}

/// Map an SDK failure onto a pipeline error: dispatch and timeout failures
/// never reached the service and are retryable, service responses are not.
pub(crate) fn classify<E, R>(err: SdkError<E, R>, cat: &'static str) -> PipelineError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let retryable = matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_));

    let ret = PipelineError::new(cat, err);
    if retryable {
        ret.retryable()
    } else {
        ret
    }
}

/// Fans a single projection write out to every underlying writer and
/// returns the first error.
pub struct ParallelProjectionWriter {
    writers: Vec<Arc<dyn ProjectionWriter>>,
}

impl ParallelProjectionWriter {
    /// Compose the given writers.
    pub fn new(writers: Vec<Arc<dyn ProjectionWriter>>) -> Self {
        Self { writers }
    }
}

#[async_trait]
impl ProjectionWriter for ParallelProjectionWriter {
    async fn write(&self, kind: ProjectionKind, projection: &Projection) -> PipelineResult {
        try_join_all(
            self.writers
                .iter()
                .map(|writer| writer.write(kind, projection)),
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn writer() -> S3ProjectionWriter {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();

        S3ProjectionWriter::new(
            aws_sdk_s3::Client::from_conf(config),
            "bucket".to_string(),
            "custom".to_string(),
        )
    }

    fn projection(id: &str) -> Projection {
        Projection {
            id: id.to_string(),
            timestamp: Utc.timestamp_opt(1_741_014_594, 0).unwrap(),
            payload: Default::default(),
        }
    }

    #[test]
    fn object_key_layout() {
        let writer = writer();

        let key = writer
            .compute_object_key(ProjectionKind::ClusterEvent, &projection("abcdef"))
            .unwrap();
        assert_eq!(key, "custom.events/2025-03-03/abcdef.ndjson");

        let key = writer
            .compute_object_key(ProjectionKind::ClusterState, &projection("04587"))
            .unwrap();
        assert_eq!(key, "custom.clusters/2025-03-03/04587.ndjson");

        let key = writer
            .compute_object_key(ProjectionKind::InfraEnv, &projection("0f0f"))
            .unwrap();
        assert_eq!(key, "custom.infra_envs/2025-03-03/0f0f.ndjson");
    }

    #[test]
    fn object_key_requires_lowercase_hex_prefix() {
        let writer = writer();

        for id in ["xyz", "Az", "!fff", "", "g00d", "F00"] {
            let err = writer
                .compute_object_key(ProjectionKind::ClusterEvent, &projection(id))
                .unwrap_err();
            assert_eq!(err.category(), Some(category::S3_INVALID_KEY), "id = {id:?}");
            assert!(!err.is_retryable());
        }

        for id in ["abcdef012", "04587", "78xyz", "f", "0"] {
            assert!(
                writer
                    .compute_object_key(ProjectionKind::ClusterEvent, &projection(id))
                    .is_ok(),
                "id = {id:?}",
            );
        }
    }
}

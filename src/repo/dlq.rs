//! S3 dead-letter writer

use crate::pipeline::{category, FailedRecord, PipelineError, PipelineResult, RecordContext};
use crate::repo::DeadLetterWriter;
use crate::version;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

const UNKNOWN_HOSTNAME: &str = "<unknown>";

/// Serialized body of a dead-letter object: the full context needed to
/// understand and replay the failure.
#[derive(Debug, Serialize)]
pub struct DeadLetterRecord {
    /// Where and when the failure happened
    pub processing_context: ProcessingContext,
    /// The record that failed plus any captured side inputs
    pub sources: Sources,
    /// Why it failed
    pub reason: Reason,
}

/// Identifies the processing component and instant of failure.
#[derive(Debug, Serialize)]
pub struct ProcessingContext {
    /// Build provenance of the component
    pub component: Component,
    /// Instant the record was written
    pub time: DateTime<Utc>,
    /// Processing host name
    pub host: String,
}

/// Build provenance.
#[derive(Debug, Serialize)]
pub struct Component {
    /// VCS branch the binary was built from
    pub branch: &'static str,
    /// VCS revision the binary was built from
    pub revision: &'static str,
}

/// The failing record and its side inputs.
#[derive(Debug, Serialize)]
pub struct Sources {
    /// The consumed record itself
    pub main: Source,
    /// Side inputs in use when the failure occurred
    pub additional: Vec<KeyValue>,
}

/// Source record coordinates and raw value.
#[derive(Debug, Serialize)]
pub struct Source {
    /// Topic the record came from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Raw record value, base64-encoded
    pub payload: String,
}

/// One captured side input.
#[derive(Debug, Serialize)]
pub struct KeyValue {
    /// Input identifier
    pub key: String,
    /// Serialized input value
    pub value: String,
}

/// Failure classification.
#[derive(Debug, Serialize)]
pub struct Reason {
    /// Machine-readable category
    pub category: String,
    /// Human-readable error chain
    pub error: String,
}

/// Writes failed records under
/// `<prefix>/<YYYY>/<MM>/<DD>/<topic>/<partition>-<offset>.json`, dated by
/// the record's broker timestamp.
pub struct S3DeadLetterWriter {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    hostname: String,
}

impl S3DeadLetterWriter {
    /// Build the writer for one bucket and key prefix.
    pub fn new(client: aws_sdk_s3::Client, bucket: String, prefix: String) -> Self {
        let hostname =
            std::env::var("HOSTNAME").unwrap_or_else(|_| UNKNOWN_HOSTNAME.to_string());

        Self {
            client,
            bucket,
            prefix,
            hostname,
        }
    }

    fn create_record(&self, failed: &FailedRecord) -> DeadLetterRecord {
        DeadLetterRecord {
            processing_context: ProcessingContext {
                component: Component {
                    branch: version::BRANCH,
                    revision: version::REVISION,
                },
                time: Utc::now(),
                host: self.hostname.clone(),
            },
            sources: Sources {
                main: Source {
                    topic: failed.record.topic.clone(),
                    partition: failed.record.partition,
                    offset: failed.record.offset,
                    payload: BASE64.encode(&failed.record.payload),
                },
                additional: failed
                    .error
                    .inputs()
                    .iter()
                    .map(|input| KeyValue {
                        key: input.key.clone(),
                        value: input.value.clone(),
                    })
                    .collect(),
            },
            reason: Reason {
                category: failed
                    .error
                    .category()
                    .unwrap_or(category::UNKNOWN)
                    .to_string(),
                error: failed.error.to_string(),
            },
        }
    }

    fn compute_object_key(&self, record: &RecordContext) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}/{}-{}.json",
            self.prefix,
            record.timestamp.year(),
            record.timestamp.month(),
            record.timestamp.day(),
            record.topic,
            record.partition,
            record.offset,
        )
    }
}

#[async_trait]
impl DeadLetterWriter for S3DeadLetterWriter {
    async fn write(&self, failed: &FailedRecord) -> PipelineResult {
        let record = self.create_record(failed);

        let body = serde_json::to_vec(&record).map_err(|err| {
            PipelineError::uncategorized(err).context("failed to serialize dead letter record")
        })?;

        let key = self.compute_object_key(&failed.record);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                // Category is left to the caller; retryability is decided
                // here where the transport failure is visible.
                let retryable = matches!(
                    err,
                    aws_sdk_s3::error::SdkError::DispatchFailure(_)
                        | aws_sdk_s3::error::SdkError::TimeoutError(_)
                );

                let ret = PipelineError::uncategorized(err).context("failed to write in s3");
                if retryable {
                    ret.retryable()
                } else {
                    ret
                }
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;

    fn writer() -> S3DeadLetterWriter {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();

        S3DeadLetterWriter::new(
            aws_sdk_s3::Client::from_conf(config),
            "dlq".to_string(),
            "errors".to_string(),
        )
    }

    fn failed(payload: &[u8]) -> FailedRecord {
        FailedRecord {
            record: RecordContext {
                topic: "events".to_string(),
                partition: 3,
                offset: 1042,
                timestamp: Utc.with_ymd_and_hms(2024, 11, 21, 2, 57, 38).unwrap(),
                payload: payload.to_vec(),
            },
            error: PipelineError::new(category::UNMARSHAL, anyhow!("invalid character"))
                .context("failed to decode record"),
        }
    }

    #[test]
    fn object_key_is_dated_by_broker_timestamp() {
        let key = writer().compute_object_key(&failed(b"not even json").record);
        assert_eq!(key, "errors/2024/11/21/events/3-1042.json");
    }

    #[test]
    fn record_carries_full_context() {
        let record = writer().create_record(&failed(b"not even json"));

        assert_eq!(record.sources.main.topic, "events");
        assert_eq!(record.sources.main.partition, 3);
        assert_eq!(record.sources.main.offset, 1042);
        assert_eq!(
            record.sources.main.payload,
            BASE64.encode(b"not even json")
        );
        assert_eq!(record.reason.category, "unmarshal");
        assert!(record.reason.error.contains("failed to decode record"));
        assert!(record.reason.error.contains("invalid character"));

        let encoded = serde_json::to_string(&record).unwrap();
        assert!(encoded.contains("\"processing_context\""));
        assert!(encoded.contains("\"reason\""));
    }
}

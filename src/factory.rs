//! Client construction and pipeline assembly
//!
//! Main stack (outer → inner):
//!
//! ```text
//! panic guard → count → count late → duration → retry → transform
//! ```
//!
//! Error stack:
//!
//! ```text
//!                                  ┌─> retry → dead-letter write
//! panic guard → duration → parallel┤
//!                                  └─> error count
//! ```

use crate::config::{KafkaConfig, S3Config, ValkeyConfig};
use crate::entity::Event;
use crate::pipeline::{
    DurationMetrics, ErrorCount, FailedRecord, PanicGuard, Parallel, Processing, Retry,
    RetryConfig,
};
use crate::processing::{CountData, CountLateData, DeadLetterProcessor, EventProcessor};
use anyhow::Context;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use prometheus::Registry;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::ClientConfig;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Create and subscribe the consumer-group client.
///
/// Offsets are committed manually after each terminal outcome, so
/// auto-commit stays off and consumption starts from the oldest offset on
/// a fresh group.
pub fn create_kafka_consumer(conf: &KafkaConfig) -> anyhow::Result<StreamConsumer> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &conf.broker.urls)
        .set("group.id", &conf.consumer.group)
        .set("client.id", compute_client_id(&conf.consumer.group))
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");

    if !conf.broker.version.is_empty() {
        client_config.set("broker.version.fallback", &conf.broker.version);
    }

    match (conf.broker.use_tls, conf.broker.creds.use_scram_sha512_auth) {
        (true, true) => {
            client_config.set("security.protocol", "sasl_ssl");
        }
        (true, false) => {
            client_config.set("security.protocol", "ssl");
        }
        (false, true) => {
            client_config.set("security.protocol", "sasl_plaintext");
        }
        (false, false) => {}
    }

    if conf.broker.creds.use_scram_sha512_auth {
        client_config
            .set("sasl.mechanisms", "SCRAM-SHA-512")
            .set("sasl.username", &conf.broker.creds.user)
            .set("sasl.password", &conf.broker.creds.password);
    }

    let consumer: StreamConsumer = client_config
        .create()
        .context("failed to create kafka consumer group")?;

    let topics = conf.consumer.topics();
    consumer
        .subscribe(&topics)
        .context("failed to subscribe to topics")?;

    info!(?topics, group = %conf.consumer.group, "subscribed");

    Ok(consumer)
}

fn compute_client_id(group: &str) -> String {
    let prefix = std::env::var("HOSTNAME").unwrap_or_else(|_| format!("clientid-{group}"));

    format!("{}-{:x}", prefix, std::process::id())
}

/// Create the cache client and verify connectivity with a PING.
pub async fn create_valkey_client(conf: &ValkeyConfig) -> anyhow::Result<ConnectionManager> {
    let url = valkey_url(conf);

    let client = redis::Client::open(url).context("failed to create valkey client")?;

    let mut manager = ConnectionManager::new(client)
        .await
        .context("failed to connect to valkey")?;

    redis::cmd("PING")
        .query_async::<_, String>(&mut manager)
        .await
        .context("failed to ping valkey")?;

    Ok(manager)
}

fn valkey_url(conf: &ValkeyConfig) -> String {
    if conf.url.contains("://") {
        return conf.url.clone();
    }

    if conf.creds.password.is_empty() {
        format!("redis://{}", conf.url)
    } else {
        format!("redis://:{}@{}", conf.creds.password, conf.url)
    }
}

/// Create one S3 client, honoring endpoint and path-style overrides for
/// S3-compatible stores.
pub async fn create_s3_client(conf: &S3Config) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(conf.region.clone()));

    if !conf.creds.access_key_id.is_empty() && !conf.creds.secret_access_key.is_empty() {
        loader = loader.credentials_provider(Credentials::new(
            conf.creds.access_key_id.clone(),
            conf.creds.secret_access_key.clone(),
            None,
            None,
            "ccx-exporter",
        ));
    }

    let sdk_config = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(conf.use_path_style);

    if !conf.base_endpoint.is_empty() {
        builder = builder.endpoint_url(normalize_endpoint(&conf.base_endpoint));
    }

    aws_sdk_s3::Client::from_conf(builder.build())
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }

    format!("https://{endpoint}")
}

/// Decorate the main transform with the full main-processing stack.
pub fn decorate_processing(
    main: EventProcessor,
    registry: &Registry,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<dyn Processing<Event>>> {
    let ret = Retry::new(main, retry, cancel);
    let ret = DurationMetrics::new(ret, registry, "", None)
        .context("failed to create duration metrics processing")?;
    let ret = CountLateData::new(ret, registry)
        .context("failed to create late data count processing")?;
    let ret =
        CountData::new(ret, registry).context("failed to create data count processing")?;
    let ret = PanicGuard::new(ret);

    Ok(Arc::new(ret))
}

/// Decorate the dead-letter step with the full error-processing stack.
pub fn decorate_error_processing(
    main: DeadLetterProcessor,
    registry: &Registry,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<dyn Processing<FailedRecord>>> {
    let retried = Retry::new(main, retry, cancel);

    let error_count =
        ErrorCount::new(registry).context("failed to create error count processing")?;

    // The counter branch never fails and completes on its first poll, so it
    // is listed first: a dead-letter write failing without yielding must not
    // cancel the count.
    let ret: Parallel<FailedRecord> =
        Parallel::new(vec![Box::new(error_count), Box::new(retried)]);
    let ret = DurationMetrics::new(ret, registry, "error", None)
        .context("failed to create error duration metrics processing")?;
    let ret = PanicGuard::new(ret);

    Ok(Arc::new(ret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valkey_url_variants() {
        let mut conf = ValkeyConfig {
            url: "localhost:6379".to_string(),
            ..Default::default()
        };
        assert_eq!(valkey_url(&conf), "redis://localhost:6379");

        conf.creds.password = "shhh".to_string();
        assert_eq!(valkey_url(&conf), "redis://:shhh@localhost:6379");

        conf.url = "rediss://secure:6379".to_string();
        assert_eq!(valkey_url(&conf), "rediss://secure:6379");
    }

    #[test]
    fn endpoints_default_to_https() {
        assert_eq!(
            normalize_endpoint("minio.local:9000"),
            "https://minio.local:9000"
        );
        assert_eq!(
            normalize_endpoint("http://minio.local:9000"),
            "http://minio.local:9000"
        );
    }
}

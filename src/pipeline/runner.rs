//! Consumer-group driver
//!
//! One router loop reads the consumer stream and hands each record to a
//! per-partition worker over a bounded channel. Workers process their
//! records strictly in order, so per-partition FIFO and non-decreasing
//! commits hold by construction while partitions proceed in parallel.

use crate::pipeline::{
    category, FailedRecord, PipelineError, Processing, RecordContext,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Message, Offset, TopicPartitionList};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Records buffered per partition before the router backpressures.
const WORKER_QUEUE_DEPTH: usize = 64;

/// Commit seam so record handling is testable without a broker.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Mark everything up to and including `offset` as processed.
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError>;
}

struct KafkaOffsetCommitter {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl OffsetCommitter for KafkaOffsetCommitter {
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;

        self.consumer.commit(&list, CommitMode::Async)
    }
}

/// Drives the consumer group: decode, dispatch, commit.
pub struct PipelineRunner<P> {
    consumer: Arc<StreamConsumer>,
    handler: Arc<RecordHandler<P>>,
    shutdown: CancellationToken,
}

impl<P> PipelineRunner<P>
where
    P: DeserializeOwned + Send + Sync + 'static,
{
    /// Build the runner over an already-subscribed consumer.
    pub fn new(
        consumer: Arc<StreamConsumer>,
        processing: Arc<dyn Processing<P>>,
        error_processing: Arc<dyn Processing<FailedRecord>>,
        shutdown: CancellationToken,
    ) -> Self {
        let committer = Arc::new(KafkaOffsetCommitter {
            consumer: consumer.clone(),
        });

        let handler = Arc::new(RecordHandler {
            processing,
            error_processing,
            committer,
            shutdown: shutdown.clone(),
        });

        Self {
            consumer,
            handler,
            shutdown,
        }
    }

    /// Consume until cancellation or until the stream ends.
    ///
    /// Transport errors surfacing on the stream are logged and consumption
    /// continues; group membership and rebalances are handled by the
    /// underlying client, and since workers keep no state between records a
    /// rebalance at most re-delivers the in-flight ones.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut stream = self.consumer.stream();
        let mut workers: HashMap<(String, i32), mpsc::Sender<OwnedMessage>> = HashMap::new();
        let mut tasks = JoinSet::new();

        info!("start consuming");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, leaving consume loop");
                    break;
                }
                message = stream.next() => match message {
                    Some(Ok(message)) => {
                        self.dispatch(message.detach(), &mut workers, &mut tasks).await;
                    }
                    Some(Err(err)) => {
                        if matches!(err.rdkafka_error_code(), Some(RDKafkaErrorCode::Fatal)) {
                            error!(error = %err, "fatal kafka consumer error");

                            return Err(err.into());
                        }

                        error!(error = %err, "kafka consumer error");
                    }
                    None => {
                        warn!("consumer stream ended");
                        break;
                    }
                }
            }
        }

        // Closing the channels lets each worker drain its queue and exit.
        drop(workers);
        while tasks.join_next().await.is_some() {}

        info!("consumer stopped");

        Ok(())
    }

    async fn dispatch(
        &self,
        message: OwnedMessage,
        workers: &mut HashMap<(String, i32), mpsc::Sender<OwnedMessage>>,
        tasks: &mut JoinSet<()>,
    ) {
        let key = (message.topic().to_string(), message.partition());

        let sender = workers.entry(key.clone()).or_insert_with(|| {
            debug!(topic = %key.0, partition = key.1, "starting partition worker");

            let (tx, mut rx) = mpsc::channel::<OwnedMessage>(WORKER_QUEUE_DEPTH);
            let handler = self.handler.clone();
            let shutdown = self.shutdown.clone();

            tasks.spawn(async move {
                while let Some(message) = rx.recv().await {
                    if shutdown.is_cancelled() {
                        break;
                    }

                    handler.handle(&message).await;
                }
            });

            tx
        });

        if sender.send(message).await.is_err() {
            error!(
                topic = %key.0,
                partition = key.1,
                "partition worker is gone, dropping record",
            );
        }
    }
}

/// Per-record handling shared by all partition workers.
struct RecordHandler<P> {
    processing: Arc<dyn Processing<P>>,
    error_processing: Arc<dyn Processing<FailedRecord>>,
    committer: Arc<dyn OffsetCommitter>,
    shutdown: CancellationToken,
}

impl<P> RecordHandler<P>
where
    P: DeserializeOwned + Send + Sync + 'static,
{
    async fn handle(&self, message: &OwnedMessage) {
        debug!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "receiving record",
        );

        let Some(payload) = message.payload() else {
            info!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "skipping record without payload",
            );

            return;
        };

        match serde_json::from_slice::<P>(payload) {
            // Not retryable
            Err(err) => {
                self.process_error(message, PipelineError::new(category::UNMARSHAL, err))
                    .await;
            }
            Ok(decoded) => {
                if let Err(err) = self.processing.process(&decoded).await {
                    self.process_error(message, err).await;
                }
            }
        }

        self.commit(message).await;
    }

    async fn process_error(&self, message: &OwnedMessage, err: PipelineError) {
        let failed = FailedRecord {
            record: record_context(message),
            error: err.or_category(category::UNKNOWN),
        };

        error!(
            error = %failed.error,
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "processing failed",
        );

        if let Err(err) = self.error_processing.process(&failed).await {
            error!(error = %err, "error pipeline failed");

            self.dump_error_context(&failed);
        }
    }

    async fn commit(&self, message: &OwnedMessage) {
        // A cancellation mid-record suppresses the commit so the record is
        // reprocessed in the next session.
        if self.shutdown.is_cancelled() {
            info!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "skipping offset commit after cancellation",
            );

            return;
        }

        if let Err(err) = self
            .committer
            .commit(message.topic(), message.partition(), message.offset())
            .await
        {
            error!(error = %err, "failed to commit offset");
        }
    }

    fn dump_error_context(&self, failed: &FailedRecord) {
        let inputs: Vec<&str> = failed
            .error
            .inputs()
            .iter()
            .map(|input| input.key.as_str())
            .collect();

        error!(
            topic = %failed.record.topic,
            partition = failed.record.partition,
            offset = failed.record.offset,
            payload = %String::from_utf8_lossy(&failed.record.payload),
            additional_inputs = ?inputs,
            category = failed.error.category().unwrap_or_default(),
            "failed to process record",
        );
    }
}

fn record_context(message: &OwnedMessage) -> RecordContext {
    let timestamp = message
        .timestamp()
        .to_millis()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now);

    RecordContext {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp,
        payload: message.payload().unwrap_or_default().to_vec(),
    }
}

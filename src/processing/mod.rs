//! Event-kind dispatch and data transformation
//!
//! [`EventProcessor`] is the innermost step of the main pipeline: it
//! dispatches on the event `name` and applies the per-kind
//! canonicalization, anonymization and id-derivation rules, writing the
//! resulting projection (or cached host state) through the repository
//! traits.

pub mod cluster_event;
pub mod cluster_state;
pub mod count;
pub mod failure;
pub mod host_state;
pub mod infra_env;
pub mod late;
pub mod payload;

pub use count::CountData;
pub use failure::DeadLetterProcessor;
pub use late::{Clock, CountLateData, SystemClock};

use crate::entity::Event;
use crate::pipeline::{category, PipelineError, PipelineResult, Processing};
use crate::repo::{HostStateStore, ProjectionWriter};
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const EVENT_NAME_CLUSTER_EVENT: &str = "Event";
pub(crate) const EVENT_NAME_CLUSTER_STATE: &str = "ClusterState";
pub(crate) const EVENT_NAME_HOST_STATE: &str = "HostState";
pub(crate) const EVENT_NAME_INFRA_ENV: &str = "InfraEnv";

/// Upper bound for a single transform, including its repository writes.
const PROCESSING_TIMEOUT: Duration = Duration::from_secs(4);

/// The main transform: event-name dispatch over the four recognized kinds.
pub struct EventProcessor {
    host_store: Arc<dyn HostStateStore>,
    projection_writer: Arc<dyn ProjectionWriter>,
}

impl EventProcessor {
    /// Build the transform over its two repositories.
    pub fn new(
        host_store: Arc<dyn HostStateStore>,
        projection_writer: Arc<dyn ProjectionWriter>,
    ) -> Self {
        Self {
            host_store,
            projection_writer,
        }
    }

    fn host_store(&self) -> &dyn HostStateStore {
        self.host_store.as_ref()
    }

    fn projection_writer(&self) -> &dyn ProjectionWriter {
        self.projection_writer.as_ref()
    }
}

#[async_trait]
impl Processing<Event> for EventProcessor {
    async fn process(&self, event: &Event) -> PipelineResult {
        let dispatch = async {
            match event.name.as_str() {
                EVENT_NAME_CLUSTER_EVENT => self.process_cluster_event(event).await,
                EVENT_NAME_CLUSTER_STATE => self.process_cluster_state(event).await,
                EVENT_NAME_HOST_STATE => self.process_host_state(event).await,
                EVENT_NAME_INFRA_ENV => self.process_infra_env(event).await,
                other => Err(PipelineError::new(
                    category::UNKNOWN_NAME,
                    anyhow!("unknown event name: {other}"),
                )),
            }
        };

        match tokio::time::timeout(PROCESSING_TIMEOUT, dispatch).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::uncategorized(anyhow!(
                "processing timed out after {PROCESSING_TIMEOUT:?}"
            ))),
        }
    }
}

//! Valkey-backed host-state cache

use crate::entity::{HostState, Payload};
use crate::pipeline::{category, PipelineError, PipelineResult};
use crate::repo::HostStateStore;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Host-state cache backed by a Valkey hash per cluster.
///
/// Layout: `HSET <cluster_id> <host_id> <json>` followed by
/// `EXPIRE <cluster_id> <ttl>`, so the whole cluster entry ages out
/// together. Reads are a single `HGETALL`.
pub struct ValkeyHostStore {
    client: ConnectionManager,
    ttl: Duration,
}

/// Wire model stored in the hash; cluster and host ids live in the key and
/// field name and are re-attached on read.
#[derive(Debug, Serialize, Deserialize)]
struct CachedHostState {
    metadata: Payload,
    payload: Payload,
}

impl ValkeyHostStore {
    /// Build the store over an established connection.
    pub fn new(client: ConnectionManager, ttl: Duration) -> Self {
        Self { client, ttl }
    }
}

#[async_trait]
impl HostStateStore for ValkeyHostStore {
    async fn write_host_state(&self, state: &HostState) -> PipelineResult {
        let cached = CachedHostState {
            metadata: state.metadata.clone(),
            payload: state.payload.clone(),
        };

        let data = serde_json::to_string(&cached).map_err(|err| {
            PipelineError::new(category::VALKEY_INTERNAL_ERROR, err)
                .context("failed to serialize host state")
        })?;

        let mut conn = self.client.clone();

        redis::cmd("HSET")
            .arg(&state.cluster_id)
            .arg(&state.host_id)
            .arg(data)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| classify(err).context("failed to set hash field"))?;

        redis::cmd("EXPIRE")
            .arg(&state.cluster_id)
            .arg(self.ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|err| classify(err).context("failed to set expiration"))?;

        Ok(())
    }

    async fn get_host_states(&self, cluster_id: &str) -> PipelineResult<Vec<HostState>> {
        let mut conn = self.client.clone();

        let entries: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(cluster_id)
            .query_async(&mut conn)
            .await
            .map_err(|err| classify(err).context("failed to get all hash fields"))?;

        let mut ret = Vec::with_capacity(entries.len());

        for (host_id, raw) in entries {
            let cached: CachedHostState = serde_json::from_str(&raw).map_err(|err| {
                PipelineError::new(category::VALKEY_INTERNAL_ERROR, err).context(format!(
                    "failed to deserialize host state for {cluster_id} {host_id}"
                ))
            })?;

            ret.push(HostState {
                cluster_id: cluster_id.to_string(),
                host_id,
                payload: cached.payload,
                metadata: cached.metadata,
            });
        }

        Ok(ret)
    }
}

/// Transport failures and backend-signaled try-again conditions are worth
/// retrying; everything else is not.
fn classify(err: redis::RedisError) -> PipelineError {
    let retryable = matches!(err.kind(), ErrorKind::IoError | ErrorKind::TryAgain);

    let ret = PipelineError::new(category::VALKEY_CLIENT, err);
    if retryable {
        ret.retryable()
    } else {
        ret
    }
}

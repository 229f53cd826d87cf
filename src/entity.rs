//! Domain entities flowing through the processing pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dynamic JSON payload attached to events and projections.
///
/// `serde_json::Map` keeps its keys sorted (the `preserve_order` feature is
/// deliberately not enabled), so serializing the same payload twice yields
/// identical bytes. Content hashes and idempotent re-processing rely on this.
pub type Payload = serde_json::Map<String, Value>;

/// A single event decoded from one log record.
///
/// Every field defaults so that any JSON object decodes; events with an
/// unrecognized (or absent) `name` are rejected by the dispatcher, not by
/// deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    /// Event kind: `Event`, `ClusterState`, `HostState` or `InfraEnv`
    #[serde(default)]
    pub name: String,
    /// Event body
    #[serde(default)]
    pub payload: Payload,
    /// Transport metadata forwarded by the producer
    #[serde(default)]
    pub metadata: Payload,
}

/// Host-level state held in the short-term cache until the next
/// cluster-state event embeds it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    /// Cluster the host belongs to (cache key)
    pub cluster_id: String,
    /// Host identifier (field inside the per-cluster hash)
    pub host_id: String,
    /// Anonymized host payload
    pub payload: Payload,
    /// Transport metadata of the originating event
    pub metadata: Payload,
}

/// A canonical, anonymized, write-ready view of an input event.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Deterministic content hash; must start with a lowercase hex character
    pub id: String,
    /// Event time the projection is filed under
    pub timestamp: DateTime<Utc>,
    /// Canonicalized body written to the object store
    pub payload: Payload,
}

/// The three projection variants sharing the [`Projection`] shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionKind {
    /// Projected cluster event
    ClusterEvent,
    /// Projected cluster state (with embedded hosts)
    ClusterState,
    /// Projected infra-env state
    InfraEnv,
}

impl ProjectionKind {
    /// Object-key type segment for this projection kind.
    pub fn key_segment(&self) -> &'static str {
        match self {
            ProjectionKind::ClusterEvent => ".events",
            ProjectionKind::ClusterState => ".clusters",
            ProjectionKind::InfraEnv => ".infra_envs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_decodes_with_missing_fields() {
        let event: Event = serde_json::from_str(r#"{"payload":{"a":1}}"#).unwrap();
        assert_eq!(event.name, "");
        assert_eq!(event.payload.get("a"), Some(&Value::from(1)));
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn event_rejects_non_object_input() {
        assert!(serde_json::from_str::<Event>("\"not an event\"").is_err());
        assert!(serde_json::from_str::<Event>("not even json").is_err());
    }

    #[test]
    fn payload_serialization_is_key_sorted() {
        let payload: Payload =
            serde_json::from_str(r#"{"zeta":1,"alpha":2,"midday":3}"#).unwrap();
        let encoded = serde_json::to_string(&payload).unwrap();
        assert_eq!(encoded, r#"{"alpha":2,"midday":3,"zeta":1}"#);
    }
}

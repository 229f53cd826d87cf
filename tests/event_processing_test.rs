//! End-to-end tests of the event transforms against in-memory backends

use async_trait::async_trait;
use ccx_exporter::entity::{Event, HostState, Payload, Projection, ProjectionKind};
use ccx_exporter::pipeline::{category, PipelineResult, Processing};
use ccx_exporter::processing::payload::{hash_payload, md5_hex};
use ccx_exporter::processing::EventProcessor;
use ccx_exporter::repo::{HostStateStore, ProjectionWriter};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

// In-memory backends

#[derive(Default)]
struct MemoryHostStore {
    // cluster_id -> host_id -> state, BTreeMap to make reads unordered but
    // stable enough to exercise the caller-side sorting
    states: Mutex<HashMap<String, BTreeMap<String, HostState>>>,
}

#[async_trait]
impl HostStateStore for MemoryHostStore {
    async fn write_host_state(&self, state: &HostState) -> PipelineResult {
        self.states
            .lock()
            .unwrap()
            .entry(state.cluster_id.clone())
            .or_default()
            .insert(state.host_id.clone(), state.clone());

        Ok(())
    }

    async fn get_host_states(&self, cluster_id: &str) -> PipelineResult<Vec<HostState>> {
        let states = self.states.lock().unwrap();

        Ok(states
            .get(cluster_id)
            .map(|hosts| hosts.values().rev().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct MemoryProjectionWriter {
    writes: Mutex<Vec<(ProjectionKind, Projection)>>,
}

impl MemoryProjectionWriter {
    fn written(&self) -> Vec<(ProjectionKind, Projection)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProjectionWriter for MemoryProjectionWriter {
    async fn write(&self, kind: ProjectionKind, projection: &Projection) -> PipelineResult {
        self.writes.lock().unwrap().push((kind, projection.clone()));

        Ok(())
    }
}

struct Harness {
    processor: EventProcessor,
    host_store: Arc<MemoryHostStore>,
    writer: Arc<MemoryProjectionWriter>,
}

fn harness() -> Harness {
    let host_store = Arc::new(MemoryHostStore::default());
    let writer = Arc::new(MemoryProjectionWriter::default());

    Harness {
        processor: EventProcessor::new(host_store.clone(), writer.clone()),
        host_store,
        writer,
    }
}

fn event(name: &str, payload: Value) -> Event {
    Event {
        name: name.to_string(),
        payload: payload.as_object().expect("object literal").clone(),
        metadata: json!({"origin": "test"}).as_object().unwrap().clone(),
    }
}

fn payload_of(value: &Value) -> Payload {
    value.as_object().expect("object literal").clone()
}

// Dispatch

#[tokio::test]
async fn unknown_event_name_is_rejected() {
    let h = harness();

    let err = h
        .processor
        .process(&event("Nope", json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.category(), Some(category::UNKNOWN_NAME));
    assert!(h.writer.written().is_empty());
}

// Cluster events

#[tokio::test]
async fn cluster_event_happy_path() {
    let h = harness();

    h.processor
        .process(&event(
            "Event",
            json!({
                "cluster_id": "c1",
                "event_time": "2024-11-21T02:57:38.485Z",
                "message": "hi",
                "severity": "info",
            }),
        ))
        .await
        .unwrap();

    let written = h.writer.written();
    assert_eq!(written.len(), 1);

    let (kind, projection) = &written[0];
    assert_eq!(*kind, ProjectionKind::ClusterEvent);

    let expected_id = md5_hex(b"2024-11-21T02:57:38.485Zc1hi");
    assert_eq!(projection.id, expected_id);
    assert_eq!(projection.timestamp.to_rfc3339(), "2024-11-21T02:57:38.485+00:00");

    assert_eq!(
        projection.payload.get("event_id"),
        Some(&Value::String(expected_id))
    );
    assert_eq!(
        projection.payload.get("event_time"),
        Some(&Value::String("2024-11-21T02:57:38.485000Z".to_string()))
    );
    // Untouched fields are carried over
    assert_eq!(
        projection.payload.get("severity"),
        Some(&Value::String("info".to_string()))
    );
}

#[tokio::test]
async fn cluster_event_requires_its_fields() {
    let h = harness();

    let cases = [
        json!({"event_time": "2024-11-21T02:57:38.485Z", "message": "hi"}),
        json!({"cluster_id": "c1", "message": "hi"}),
        json!({"cluster_id": "c1", "event_time": "2024-11-21T02:57:38.485Z"}),
        json!({"cluster_id": "", "event_time": "2024-11-21T02:57:38.485Z", "message": "hi"}),
        json!({"cluster_id": "c1", "event_time": "not-a-date", "message": "hi"}),
    ];

    for payload in cases {
        let err = h
            .processor
            .process(&event("Event", payload.clone()))
            .await
            .unwrap_err();

        assert_eq!(
            err.category(),
            Some(category::INVALID_CLUSTER_EVENT),
            "payload = {payload}",
        );
    }

    assert!(h.writer.written().is_empty());
}

#[tokio::test]
async fn cluster_event_reprocessing_is_byte_identical() {
    let h = harness();
    let input = event(
        "Event",
        json!({
            "cluster_id": "c1",
            "event_time": "2024-11-21T02:57:38.485Z",
            "message": "hi",
        }),
    );

    h.processor.process(&input).await.unwrap();
    h.processor.process(&input).await.unwrap();

    let written = h.writer.written();
    assert_eq!(written.len(), 2);

    let first = serde_json::to_vec(&written[0].1.payload).unwrap();
    let second = serde_json::to_vec(&written[1].1.payload).unwrap();
    assert_eq!(first, second);
}

// Host states

#[tokio::test]
async fn host_state_is_cached_not_emitted() {
    let h = harness();

    h.processor
        .process(&event(
            "HostState",
            json!({
                "cluster_id": "c1",
                "id": "h1",
                "user_name": "test",
                "inventory": "{\"cpu\": {\"count\": 8}}",
                "free_addresses": ["10.0.0.1"],
                "status": "known",
            }),
        ))
        .await
        .unwrap();

    assert!(h.writer.written().is_empty(), "no projection for host states");

    let states = h.host_store.get_host_states("c1").await.unwrap();
    assert_eq!(states.len(), 1);

    let state = &states[0];
    assert_eq!(state.cluster_id, "c1");
    assert_eq!(state.host_id, "h1");
    assert_eq!(state.metadata.get("origin"), Some(&Value::from("test")));

    // user_name replaced by its hash
    assert!(state.payload.get("user_name").is_none());
    assert_eq!(
        state.payload.get("user_id"),
        Some(&Value::String(md5_hex(b"test")))
    );

    // inventory parsed into an object under host_inventory
    assert!(state.payload.get("inventory").is_none());
    assert_eq!(
        state.payload.get("host_inventory"),
        Some(&json!({"cpu": {"count": 8}})),
    );

    assert!(state.payload.get("free_addresses").is_none());
    assert_eq!(state.payload.get("status"), Some(&Value::from("known")));
}

#[tokio::test]
async fn host_state_inventory_byte_array_is_parsed() {
    let h = harness();

    let bytes: Vec<Value> = br#"{"cpu": {"count": 4}}"#
        .iter()
        .map(|byte| Value::from(*byte))
        .collect();
    let mut payload = payload_of(&json!({"cluster_id": "c1", "id": "h1"}));
    payload.insert("inventory".to_string(), Value::Array(bytes));

    h.processor
        .process(&Event {
            name: "HostState".to_string(),
            payload,
            metadata: Default::default(),
        })
        .await
        .unwrap();

    let states = h.host_store.get_host_states("c1").await.unwrap();
    assert_eq!(states.len(), 1);

    assert!(states[0].payload.get("inventory").is_none());
    assert_eq!(
        states[0].payload.get("host_inventory"),
        Some(&json!({"cpu": {"count": 4}})),
    );
}

#[tokio::test]
async fn host_state_with_invalid_inventory_is_rejected() {
    let h = harness();

    let cases = [
        // not JSON at all
        json!({"cluster_id": "c1", "id": "h1", "inventory": "not json"}),
        // byte array holding something that is not JSON
        json!({"cluster_id": "c1", "id": "h1", "inventory": [110, 111, 112, 101]}),
        // array elements that are not bytes
        json!({"cluster_id": "c1", "id": "h1", "inventory": [123, 900, 125]}),
    ];

    for payload in cases {
        let err = h
            .processor
            .process(&event("HostState", payload.clone()))
            .await
            .unwrap_err();

        assert_eq!(
            err.category(),
            Some(category::INVALID_HOST_EVENT),
            "payload = {payload}",
        );
    }
}

// Cluster states

fn host_event(host_id: &str, detail: &str) -> Event {
    event(
        "HostState",
        json!({"cluster_id": "c1", "id": host_id, "detail": detail}),
    )
}

fn cluster_state_payload() -> Value {
    json!({
        "id": "c1",
        "created_at": "2024-11-20T10:00:00.000Z",
        "updated_at": "2024-11-21T02:57:38.485Z",
        "email_domain": "example.com",
        "user_name": "test",
    })
}

#[tokio::test]
async fn cluster_state_embeds_hosts_sorted_by_host_id() {
    let h = harness();

    for host_id in ["h3", "h1", "h4", "h2"] {
        h.processor
            .process(&host_event(host_id, &format!("detail-{host_id}")))
            .await
            .unwrap();
    }

    h.processor
        .process(&event("ClusterState", cluster_state_payload()))
        .await
        .unwrap();

    let written = h.writer.written();
    assert_eq!(written.len(), 1);

    let (kind, projection) = &written[0];
    assert_eq!(*kind, ProjectionKind::ClusterState);

    // The id hashes the original payload, before hosts and anonymization
    let expected_id = hash_payload(&payload_of(&cluster_state_payload())).unwrap();
    assert_eq!(projection.id, expected_id);
    assert_eq!(
        projection.payload.get("cluster_state_id"),
        Some(&Value::String(expected_id))
    );

    let hosts = projection
        .payload
        .get("hosts")
        .and_then(Value::as_array)
        .expect("hosts array");
    let details: Vec<&str> = hosts
        .iter()
        .map(|host| host.get("detail").and_then(Value::as_str).unwrap())
        .collect();
    assert_eq!(details, vec!["detail-h1", "detail-h2", "detail-h3", "detail-h4"]);

    // Anonymization and canonical dates
    assert!(projection.payload.get("user_name").is_none());
    assert_eq!(
        projection.payload.get("user_id"),
        Some(&Value::String(md5_hex(b"test")))
    );
    assert_eq!(
        projection.payload.get("updated_at"),
        Some(&Value::String("2024-11-21T02:57:38.485000Z".to_string()))
    );
}

#[tokio::test]
async fn cluster_state_uses_the_latest_host_write() {
    let h = harness();

    h.processor.process(&host_event("h1", "v1")).await.unwrap();
    h.processor.process(&host_event("h1", "v2")).await.unwrap();

    h.processor
        .process(&event("ClusterState", cluster_state_payload()))
        .await
        .unwrap();

    let written = h.writer.written();
    let hosts = written[0]
        .1
        .payload
        .get("hosts")
        .and_then(Value::as_array)
        .expect("hosts array");

    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].get("detail"), Some(&Value::from("v2")));
}

#[tokio::test]
async fn cluster_state_requires_its_fields() {
    let h = harness();

    for missing in ["created_at", "updated_at", "email_domain"] {
        let mut payload = payload_of(&cluster_state_payload());
        payload.remove(missing);

        let err = h
            .processor
            .process(&Event {
                name: "ClusterState".to_string(),
                payload,
                metadata: Default::default(),
            })
            .await
            .unwrap_err();

        assert_eq!(
            err.category(),
            Some(category::INVALID_CLUSTER_STATE),
            "missing field {missing}",
        );
    }

    assert!(h.writer.written().is_empty());
}

#[tokio::test]
async fn cluster_state_validation_failure_captures_host_inputs() {
    let h = harness();

    h.processor.process(&host_event("h1", "v1")).await.unwrap();

    let mut payload = payload_of(&cluster_state_payload());
    payload.remove("email_domain");

    let err = h
        .processor
        .process(&Event {
            name: "ClusterState".to_string(),
            payload,
            metadata: Default::default(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.inputs().len(), 1);
    assert_eq!(err.inputs()[0].key, "c1-h1");
}

// Infra envs

#[tokio::test]
async fn infra_env_happy_path() {
    let h = harness();
    let input = json!({
        "updated_at": "2024-11-21T02:57:38.485Z",
        "user_name": "test",
        "cpu_architecture": "x86_64",
    });

    h.processor
        .process(&event("InfraEnv", input.clone()))
        .await
        .unwrap();

    let written = h.writer.written();
    assert_eq!(written.len(), 1);

    let (kind, projection) = &written[0];
    assert_eq!(*kind, ProjectionKind::InfraEnv);

    let expected_id = hash_payload(&payload_of(&input)).unwrap();
    assert_eq!(projection.id, expected_id);
    assert_eq!(
        projection.payload.get("infraenv_state_id"),
        Some(&Value::String(expected_id))
    );
    assert!(projection.payload.get("user_name").is_none());
    assert_eq!(
        projection.payload.get("user_id"),
        Some(&Value::String(md5_hex(b"test")))
    );
}

#[tokio::test]
async fn infra_env_without_user_gets_no_user_id() {
    let h = harness();

    h.processor
        .process(&event(
            "InfraEnv",
            json!({"updated_at": "2024-11-21T02:57:38.485Z"}),
        ))
        .await
        .unwrap();

    let written = h.writer.written();
    assert!(written[0].1.payload.get("user_id").is_none());
    assert!(written[0].1.payload.get("user_name").is_none());
}

#[tokio::test]
async fn infra_env_requires_updated_at() {
    let h = harness();

    let err = h
        .processor
        .process(&event("InfraEnv", json!({"name": "env"})))
        .await
        .unwrap_err();

    assert_eq!(err.category(), Some(category::INVALID_INFRAENV_EVENT));
}

// Timeout

struct SlowWriter;

#[async_trait]
impl ProjectionWriter for SlowWriter {
    async fn write(&self, _kind: ProjectionKind, _projection: &Projection) -> PipelineResult {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;

        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn transform_is_bounded_by_a_timeout() {
    let processor = EventProcessor::new(
        Arc::new(MemoryHostStore::default()),
        Arc::new(SlowWriter),
    );

    let err = processor
        .process(&event(
            "Event",
            json!({
                "cluster_id": "c1",
                "event_time": "2024-11-21T02:57:38.485Z",
                "message": "hi",
            }),
        ))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("timed out"));
}

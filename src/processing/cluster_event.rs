//! Cluster event transform

use crate::entity::{Event, Projection, ProjectionKind};
use crate::pipeline::{category, PipelineError, PipelineResult};
use crate::processing::payload::{
    copy_payload, extract_string, format_date, md5_hex, validate_date,
};
use crate::processing::EventProcessor;
use serde_json::Value;

fn invalid(err: impl Into<anyhow::Error>, reason: &'static str) -> PipelineError {
    PipelineError::new(category::INVALID_CLUSTER_EVENT, err).context(reason)
}

impl EventProcessor {
    pub(super) async fn process_cluster_event(&self, event: &Event) -> PipelineResult {
        // Extract mandatory fields
        let cluster_id = extract_string(&event.payload, "cluster_id")
            .map_err(|err| invalid(err, "failed to extract cluster_id"))?;

        let event_time = extract_string(&event.payload, "event_time")
            .map_err(|err| invalid(err, "failed to extract event_time"))?;

        let timestamp =
            validate_date(event_time).map_err(|err| invalid(err, "invalid date format"))?;

        let message = extract_string(&event.payload, "message")
            .map_err(|err| invalid(err, "failed to extract message"))?;

        // The id hashes the raw event_time, not the canonicalized one
        let event_id = compute_event_id(cluster_id, event_time, message);

        let mut payload = copy_payload(&event.payload);
        payload.insert("event_id".to_string(), Value::String(event_id.clone()));
        payload.insert(
            "event_time".to_string(),
            Value::String(format_date(timestamp)),
        );

        let projection = Projection {
            id: event_id,
            timestamp,
            payload,
        };

        self.projection_writer()
            .write(ProjectionKind::ClusterEvent, &projection)
            .await
            .map_err(|err| err.context("failed to write event"))
    }
}

fn compute_event_id(cluster_id: &str, event_time: &str, message: &str) -> String {
    let key = format!("{event_time}{cluster_id}{message}");

    md5_hex(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::payload::md5_hex;

    #[test]
    fn event_id_concatenates_time_cluster_and_message() {
        let id = compute_event_id("c1", "2024-11-21T02:57:38.485Z", "hi");

        assert_eq!(id, md5_hex(b"2024-11-21T02:57:38.485Zc1hi"));
        assert!(id.chars().next().unwrap().is_ascii_hexdigit());
    }
}

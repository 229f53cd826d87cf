//! Cluster state transform: host-aggregation join + anonymization

use crate::entity::{Event, HostState, Projection, ProjectionKind};
use crate::pipeline::{category, Input, PipelineError, PipelineResult};
use crate::processing::payload::{
    copy_payload, extract_string, format_date, hash_payload, hash_value, validate_date,
};
use crate::processing::EventProcessor;
use serde_json::Value;
use tracing::error;

fn invalid(
    err: impl Into<anyhow::Error>,
    inputs: Vec<Input>,
    reason: &'static str,
) -> PipelineError {
    PipelineError::new(category::INVALID_CLUSTER_STATE, err)
        .with_inputs(inputs)
        .context(reason)
}

impl EventProcessor {
    pub(super) async fn process_cluster_state(&self, event: &Event) -> PipelineResult {
        let mut payload = copy_payload(&event.payload);

        let cluster_id = extract_string(&event.payload, "id")
            .map_err(|err| invalid(err, Vec::new(), "failed to extract id"))?;

        // Sorted by host id to have a deterministic cluster_state_id
        let mut host_states = self
            .host_store()
            .get_host_states(cluster_id)
            .await
            .map_err(|err| err.context("failed to get host states"))?;

        host_states.sort_by(|a, b| a.host_id.cmp(&b.host_id));

        let hosts: Vec<Value> = host_states
            .iter()
            .map(|hs| Value::Object(hs.payload.clone()))
            .collect();

        payload.insert("hosts".to_string(), Value::Array(hosts));

        // Mandatory fields
        extract_string(&event.payload, "created_at").map_err(|err| {
            invalid(
                err,
                host_state_inputs(&host_states),
                "failed to extract created_at",
            )
        })?;

        let updated_at_raw = extract_string(&event.payload, "updated_at").map_err(|err| {
            invalid(
                err,
                host_state_inputs(&host_states),
                "failed to extract updated_at",
            )
        })?;

        extract_string(&event.payload, "email_domain").map_err(|err| {
            invalid(
                err,
                host_state_inputs(&host_states),
                "failed to extract email_domain",
            )
        })?;

        let updated_at = validate_date(updated_at_raw)
            .map_err(|err| invalid(err, host_state_inputs(&host_states), "invalid updated_at"))?;

        payload.insert(
            "updated_at".to_string(),
            Value::String(format_date(updated_at)),
        );

        // Anonymize user_name
        let hashed_user = hash_value(&payload, "user_name").map_err(|err| {
            invalid(
                err,
                host_state_inputs(&host_states),
                "failed to hash user_name",
            )
        })?;

        payload.insert("user_id".to_string(), Value::String(hashed_user));
        payload.remove("user_name");

        // The id hashes the original payload, before any derivation
        let cluster_state_id = hash_payload(&event.payload).map_err(|err| {
            invalid(
                err,
                host_state_inputs(&host_states),
                "failed to compute cluster state id",
            )
        })?;

        payload.insert(
            "cluster_state_id".to_string(),
            Value::String(cluster_state_id.clone()),
        );

        let projection = Projection {
            id: cluster_state_id,
            timestamp: updated_at,
            payload,
        };

        if let Err(err) = self
            .projection_writer()
            .write(ProjectionKind::ClusterState, &projection)
            .await
        {
            // Keep the writer's category when it has one and append the
            // host-state inputs so the DLQ record can be replayed.
            let mut inputs = host_state_inputs(&host_states);
            inputs.extend(err.inputs().to_vec());

            return Err(err
                .or_category(category::HOST_WRITER_REPO)
                .with_inputs(inputs)
                .context("failed to write cluster state"));
        }

        Ok(())
    }
}

fn host_state_inputs(states: &[HostState]) -> Vec<Input> {
    let mut ret = Vec::with_capacity(states.len());

    for state in states {
        let value = match serde_json::to_string(state) {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "failed to serialize host state");

                continue;
            }
        };

        ret.push(Input {
            key: format!("{}-{}", state.cluster_id, state.host_id),
            value,
        });
    }

    ret
}

//! Infra-env transform

use crate::entity::{Event, Projection, ProjectionKind};
use crate::pipeline::{category, PipelineError, PipelineResult};
use crate::processing::payload::{
    copy_payload, extract_string, format_date, hash_payload, hash_value, validate_date,
};
use crate::processing::EventProcessor;
use serde_json::Value;

fn invalid(err: impl Into<anyhow::Error>, reason: &'static str) -> PipelineError {
    PipelineError::new(category::INVALID_INFRAENV_EVENT, err).context(reason)
}

impl EventProcessor {
    pub(super) async fn process_infra_env(&self, event: &Event) -> PipelineResult {
        let updated_at_raw = extract_string(&event.payload, "updated_at")
            .map_err(|err| invalid(err, "failed to extract updated_at"))?;

        let updated_at = validate_date(updated_at_raw)
            .map_err(|err| invalid(err, "invalid format for updated_at"))?;

        let mut payload = copy_payload(&event.payload);
        payload.insert(
            "updated_at".to_string(),
            Value::String(format_date(updated_at)),
        );

        // Anonymize user_name
        let hashed_user = hash_value(&payload, "user_name")
            .map_err(|err| invalid(err, "failed to hash user_name"))?;

        if !hashed_user.is_empty() {
            payload.insert("user_id".to_string(), Value::String(hashed_user));
        }

        payload.remove("user_name");

        let infraenv_state_id = hash_payload(&event.payload)
            .map_err(|err| invalid(err, "failed to compute infraenv state id"))?;

        payload.insert(
            "infraenv_state_id".to_string(),
            Value::String(infraenv_state_id.clone()),
        );

        let projection = Projection {
            id: infraenv_state_id,
            timestamp: updated_at,
            payload,
        };

        self.projection_writer()
            .write(ProjectionKind::InfraEnv, &projection)
            .await
            .map_err(|err| err.context("failed to write infraenv"))
    }
}

//! Host state transform: anonymize, normalize inventory, cache

use crate::entity::{Event, HostState};
use crate::pipeline::{category, PipelineError, PipelineResult};
use crate::processing::payload::{copy_payload, extract_string, hash_value};
use crate::processing::EventProcessor;
use anyhow::{anyhow, Context as _};
use serde_json::Value;

fn invalid(err: impl Into<anyhow::Error>, reason: &'static str) -> PipelineError {
    PipelineError::new(category::INVALID_HOST_EVENT, err).context(reason)
}

fn bytes_to_utf8_string(values: &[Value]) -> anyhow::Result<String> {
    let mut bytes = Vec::with_capacity(values.len());

    for value in values {
        let byte = value
            .as_u64()
            .and_then(|b| u8::try_from(b).ok())
            .ok_or_else(|| anyhow!("array element {value} is not a byte"))?;

        bytes.push(byte);
    }

    String::from_utf8(bytes).context("byte array is not valid UTF-8")
}

impl EventProcessor {
    pub(super) async fn process_host_state(&self, event: &Event) -> PipelineResult {
        // Mandatory fields
        let cluster_id = extract_string(&event.payload, "cluster_id")
            .map_err(|err| invalid(err, "failed to extract cluster_id"))?
            .to_string();

        let host_id = extract_string(&event.payload, "id")
            .map_err(|err| invalid(err, "failed to extract id"))?
            .to_string();

        let mut payload = copy_payload(&event.payload);

        // Anonymize user_name
        let hashed_user = hash_value(&payload, "user_name")
            .map_err(|err| invalid(err, "failed to hash user_name"))?;

        payload.insert("user_id".to_string(), Value::String(hashed_user));
        payload.remove("user_name");

        // The inventory arrives as JSON text, either a string or a byte
        // array; parse it so the embedded copy in the cluster projection is
        // an object, not an escaped string.
        if let Some(inventory) = payload.remove("inventory") {
            let host_inventory = match inventory {
                Value::String(raw) => serde_json::from_str(&raw)
                    .map_err(|err| invalid(err, "failed to parse inventory"))?,
                Value::Array(bytes) => {
                    let raw = bytes_to_utf8_string(&bytes)
                        .map_err(|err| invalid(err, "failed to decode inventory bytes"))?;

                    serde_json::from_str(&raw)
                        .map_err(|err| invalid(err, "failed to parse inventory"))?
                }
                other => other,
            };

            payload.insert("host_inventory".to_string(), host_inventory);
        }

        payload.remove("free_addresses");

        let host_state = HostState {
            cluster_id,
            host_id,
            payload,
            metadata: event.metadata.clone(),
        };

        self.host_store()
            .write_host_state(&host_state)
            .await
            .map_err(|err| err.context("failed to write host state"))
    }
}

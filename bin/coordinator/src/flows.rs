//! Directory-based Flow YAML loader.
//!
//! Flow definitions are not database-backed (see `flows.directory` in
//! `CoordinatorConfig`); this module re-reads that directory on every
//! cron-sync tick and turns each flow's `scheduling` entries into
//! `CronEntry` values the scheduler polls once a minute.

use flowctl_flow::{Flow, FlowExecutionPayload};
use flowctl_queue::{CronEntry, CronSchedule};
use flowctl_queue::job::PayloadType;
use flowctl_flow::TriggerType;
use std::path::Path;
use tracing::warn;

fn payload_type() -> PayloadType {
    PayloadType::new("flow_execution")
}

/// Parses every `*.yaml`/`*.yml` file directly under `directory` into a
/// `Flow`, skipping (and logging) any file that fails to parse or fails
/// `Flow::validate`.
pub async fn load_flows(directory: &str) -> std::io::Result<Vec<Flow>> {
    let mut flows = Vec::new();
    let mut entries = tokio::fs::read_dir(directory).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_yaml {
            continue;
        }

        match parse_flow_file(&path).await {
            Ok(flow) => flows.push(flow),
            Err(reason) => warn!(path = %path.display(), %reason, "skipping invalid flow definition"),
        }
    }

    Ok(flows)
}

async fn parse_flow_file(path: &Path) -> Result<Flow, String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    let flow: Flow = serde_yaml::from_str(&contents).map_err(|e| e.to_string())?;
    flow.validate().map_err(|e| e.to_string())?;
    Ok(flow)
}

/// Builds one `CronEntry` per `(flow, schedule)` pair, embedding the full
/// serialized `FlowExecutionPayload` since cron-fired jobs carry their flow
/// inline rather than by reference.
#[must_use]
pub fn cron_entries(flows: &[Flow], flows_directory: &str) -> Vec<CronEntry> {
    let mut entries = Vec::new();

    for flow in flows {
        for (idx, schedule) in flow.scheduling.iter().enumerate() {
            let payload = FlowExecutionPayload {
                flow: flow.clone(),
                input: serde_json::json!({}),
                starting_action_idx: 0,
                namespace_id: flow.namespace_id,
                trigger_type: TriggerType::Scheduled,
                user_id: None,
                flow_directory: flows_directory.to_string(),
                resumed: false,
            };
            let Ok(payload_bytes) = serde_json::to_vec(&payload) else {
                warn!(flow = %flow.slug, "failed to serialize scheduled flow payload, skipping");
                continue;
            };

            let mut cron_schedule = CronSchedule::new(schedule.cron.clone());
            if let Some(timezone) = &schedule.timezone {
                cron_schedule = cron_schedule.with_timezone(timezone.clone());
            }

            entries.push(CronEntry {
                id: format!("{}:{idx}", flow.slug),
                schedule: cron_schedule,
                payload_type: payload_type(),
                payload: payload_bytes,
            });
        }
    }

    entries
}

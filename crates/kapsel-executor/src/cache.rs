use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use kapsel_kubectl::Kubectl;
use kapsel_model::{CACHE_LABEL_PREFIX, JobContext, JobLogger};

use crate::error::ExecuteResult;

/// Maximum label mutations carried by one `label node` invocation.
const LABEL_UPDATE_BATCH: usize = 100;

/// One node-label mutation in `kubectl label` argument form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelUpdate {
    Set { key: String, value: String },
    Remove { key: String },
}

impl LabelUpdate {
    fn to_arg(&self) -> String {
        match self {
            LabelUpdate::Set { key, value } => format!("{key}={value}"),
            LabelUpdate::Remove { key } => format!("{key}-"),
        }
    }
}

/// Diff observed cache labels against desired hit counts.
///
/// Prefixed labels with no desired count are removed, stale counts are
/// overwritten, new keys are added. Labels outside the reserved prefix are
/// never touched.
pub fn plan_label_updates(
    node_labels: &Value,
    counts: &HashMap<String, u32>,
) -> Vec<LabelUpdate> {
    let mut desired: HashMap<String, u32> = counts
        .iter()
        .map(|(key, &count)| (format!("{CACHE_LABEL_PREFIX}{key}"), count))
        .collect();

    let mut updates = Vec::new();
    if let Some(labels) = node_labels.as_object() {
        for (label, value) in labels {
            if !label.starts_with(CACHE_LABEL_PREFIX) {
                continue;
            }
            match desired.remove(label) {
                None => updates.push(LabelUpdate::Remove { key: label.clone() }),
                Some(count) => {
                    let count = count.to_string();
                    if value.as_str() != Some(count.as_str()) {
                        updates.push(LabelUpdate::Set {
                            key: label.clone(),
                            value: count,
                        });
                    }
                }
            }
        }
    }
    for (key, count) in desired {
        updates.push(LabelUpdate::Set {
            key,
            value: count.to_string(),
        });
    }
    updates
}

/// Reconcile a node's cache labels with the hit counts accumulated in the
/// job context.
///
/// The counts are drained; the plan is recomputed from observed labels so a
/// repeated checkpoint converges instead of compounding. An empty count map
/// still removes stale prefixed labels. Removal of a label that vanished
/// meanwhile is tolerated.
pub async fn reconcile(
    kubectl: &Kubectl,
    node: &str,
    ctx: &mut JobContext,
    job_log: &dyn JobLogger,
) -> ExecuteResult<()> {
    let counts = ctx.take_cache_counts();

    let doc = kubectl
        .run_json(["get", "node", node, "-o", "json"], job_log)
        .await?;
    let updates = plan_label_updates(&doc["metadata"]["labels"], &counts);
    if updates.is_empty() {
        return Ok(());
    }
    debug!(target: "kapsel.executor.cache", node, updates = updates.len(), "updating cache labels");

    for batch in updates.chunks(LABEL_UPDATE_BATCH) {
        let mut args = vec![
            "label".to_string(),
            "node".to_string(),
            node.to_string(),
            "--overwrite".to_string(),
        ];
        args.extend(batch.iter().map(LabelUpdate::to_arg));
        kubectl
            .run_tolerant(
                &args,
                |line| line.starts_with("label") && line.ends_with("not found."),
                job_log,
            )
            .await?;
    }
    Ok(())
}

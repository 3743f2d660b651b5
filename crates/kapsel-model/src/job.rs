use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Env;

/// Callback invoked once the job pod has started running on a node.
pub type RunningHook = Box<dyn Fn() + Send + Sync>;

/// Everything the executor needs to know about one build job run.
///
/// Owned by the caller for the duration of the run. The cache-count map is
/// filled by earlier build steps and drained at the two label-reconciliation
/// checkpoints; nothing else touches it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    pub project_name: String,
    pub build_number: u64,
    /// Image the main container runs.
    pub image: String,
    pub cpu_request: String,
    pub memory_request: String,
    #[serde(default)]
    pub services: Vec<JobService>,
    #[serde(default)]
    pub cache_specs: Vec<CacheSpec>,
    /// Per-key cache counts observed on the node during this run.
    #[serde(default)]
    pub cache_counts: HashMap<String, u32>,
    #[serde(skip)]
    pub on_running: Option<RunningHook>,
}

impl JobContext {
    /// Signal the caller that the job pod is running.
    pub fn notify_running(&self) {
        if let Some(hook) = &self.on_running {
            hook();
        }
    }

    /// Drain the cache-count map into an immutable snapshot.
    ///
    /// Label reconciliation works from the snapshot; the live map is left
    /// empty so a repeated checkpoint never double-counts.
    pub fn take_cache_counts(&mut self) -> HashMap<String, u32> {
        std::mem::take(&mut self.cache_counts)
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("project_name", &self.project_name)
            .field("build_number", &self.build_number)
            .field("image", &self.image)
            .field("services", &self.services.len())
            .field("cache_specs", &self.cache_specs)
            .finish_non_exhaustive()
    }
}

/// Sidecar service declared by the job, reachable through a headless service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobService {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Env::is_empty")]
    pub env: Env,
    /// Arguments for the container entrypoint, quote-aware string form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    pub cpu_request: String,
    pub memory_request: String,
    /// Command run inside the container to confirm the service accepts connections.
    pub readiness_check_command: String,
}

/// Declared cache directory; the key doubles as the node-label suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context() -> JobContext {
        JobContext {
            project_name: "demo".into(),
            build_number: 7,
            image: "alpine:3.20".into(),
            cpu_request: "500m".into(),
            memory_request: "256Mi".into(),
            services: Vec::new(),
            cache_specs: Vec::new(),
            cache_counts: HashMap::new(),
            on_running: None,
        }
    }

    #[test]
    fn notify_running_fires_hook() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let mut ctx = context();
        ctx.on_running = Some(Box::new(move || flag.store(true, Ordering::SeqCst)));

        ctx.notify_running();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn take_cache_counts_drains_map() {
        let mut ctx = context();
        ctx.cache_counts.insert("m2".into(), 3);

        let snapshot = ctx.take_cache_counts();
        assert_eq!(snapshot.get("m2"), Some(&3));
        assert!(ctx.cache_counts.is_empty());
    }

    #[test]
    fn job_context_deserializes_without_optional_fields() {
        let ctx: JobContext = serde_json::from_str(
            r#"{
                "projectName": "demo",
                "buildNumber": 12,
                "image": "alpine:3.20",
                "cpuRequest": "1",
                "memoryRequest": "512Mi"
            }"#,
        )
        .unwrap();

        assert_eq!(ctx.build_number, 12);
        assert!(ctx.services.is_empty());
        assert!(ctx.on_running.is_none());
    }
}

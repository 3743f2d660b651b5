use tracing::{info, warn};

use kapsel_kubectl::Kubectl;
use kapsel_model::{JobContext, JobLogger};

use crate::error::ExecuteResult;

/// Namespace name for one run: `<prefix>-<project>-<build>`, or the fixed
/// self-test suffix when there is no job context. Characters the cluster
/// rejects in names are mapped to `-`.
pub fn namespace_name(prefix: &str, ctx: Option<&JobContext>) -> String {
    match ctx {
        Some(ctx) => {
            let project = ctx
                .project_name
                .to_lowercase()
                .replace(['.', '_'], "-");
            format!("{prefix}-{project}-{}", ctx.build_number)
        }
        None => format!("{prefix}-executor-test"),
    }
}

/// Create the run namespace, replacing a stale one left by an aborted run.
pub async fn create(
    kubectl: &Kubectl,
    namespace: &str,
    job_log: &dyn JobLogger,
) -> ExecuteResult<()> {
    let selector = format!("metadata.name={namespace}");
    let existing = kubectl
        .run(
            ["get", "namespaces", "--field-selector", selector.as_str(), "-o", "name"],
            job_log,
        )
        .await?;

    if existing.iter().any(|line| !line.trim().is_empty()) {
        warn!(target: "kapsel.executor", namespace, "replacing stale namespace");
        kubectl.run(["delete", "namespace", namespace], job_log).await?;
    }

    kubectl.run(["create", "namespace", namespace], job_log).await?;
    info!(target: "kapsel.executor", namespace, "namespace created");
    Ok(())
}

/// Best-effort teardown. A failure here is logged and swallowed so it can
/// never displace the job outcome.
pub async fn delete(kubectl: &Kubectl, namespace: &str, job_log: &dyn JobLogger) {
    match kubectl.run(["delete", "namespace", namespace], job_log).await {
        Ok(_) => info!(target: "kapsel.executor", namespace, "namespace deleted"),
        Err(e) => {
            warn!(target: "kapsel.executor", namespace, "namespace deletion failed: {e}");
            job_log.log(&format!("Failed to delete namespace {namespace}: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(project: &str, build: u64) -> JobContext {
        JobContext {
            project_name: project.into(),
            build_number: build,
            image: "alpine".into(),
            cpu_request: "250m".into(),
            memory_request: "128Mi".into(),
            services: Vec::new(),
            cache_specs: Vec::new(),
            cache_counts: Default::default(),
            on_running: None,
        }
    }

    #[test]
    fn name_joins_prefix_project_and_build() {
        let ctx = ctx("demo", 42);
        assert_eq!(namespace_name("kapsel-ci", Some(&ctx)), "kapsel-ci-demo-42");
    }

    #[test]
    fn name_maps_rejected_characters() {
        let ctx = ctx("My.Cool_App", 7);
        assert_eq!(
            namespace_name("kapsel-ci", Some(&ctx)),
            "kapsel-ci-my-cool-app-7"
        );
    }

    #[test]
    fn test_mode_uses_fixed_suffix() {
        assert_eq!(namespace_name("kapsel-ci", None), "kapsel-ci-executor-test");
    }
}

use tokio_util::sync::CancellationToken;
use tracing::info;

use kapsel_kubectl::{
    Kubectl, StatusCheck, collect_logs_bounded, watch_events, watch_pod,
};
use kapsel_kubectl::watch::{container_error, container_started, container_stopped};
use kapsel_manifest::{
    IMAGE_PULL_SECRET_NAME, INIT_CONTAINER, JOB_POD_NAME, JobPodParams, MAIN_CONTAINER,
    SIDECAR_CONTAINER, image_pull_secret, job_pod, render, trust_certs_config_map,
};
use kapsel_model::{
    ExecutorConfig, JobContext, JobLogger, LOG_END_MESSAGE, ServerSettings, TEST_JOB_TOKEN,
};

use crate::error::{ExecuteError, ExecuteResult};
use crate::{cache, namespace, os, service};

/// Runs one CI job (or the executor self-test) inside a dedicated cluster
/// namespace.
///
/// A run is strictly sequential; every watch and log follow is a suspension
/// point that honors the cancellation token. The namespace is created at the
/// start and deleted at the end no matter how the run finishes.
pub struct Executor {
    config: ExecutorConfig,
    server: ServerSettings,
    kubectl: Kubectl,
}

impl Executor {
    pub fn new(config: ExecutorConfig, server: ServerSettings) -> Self {
        let kubectl = Kubectl::from_config(
            config.kubectl_path.as_deref(),
            config.config_file.as_deref(),
        );
        Self {
            config,
            server,
            kubectl,
        }
    }

    /// Execute a CI job to completion.
    pub async fn execute(
        &self,
        job_token: &str,
        ctx: &mut JobContext,
        job_log: &dyn JobLogger,
        cancel: &CancellationToken,
    ) -> ExecuteResult<()> {
        self.check_cluster(job_log).await?;

        let namespace = namespace::namespace_name(&self.config.namespace_prefix, Some(ctx));
        namespace::create(&self.kubectl, &namespace, job_log).await?;

        let image = ctx.image.clone();
        let result = self
            .run_job(&namespace, job_token, &image, Some(ctx), job_log, cancel)
            .await;

        namespace::delete(&self.kubectl, &namespace, job_log).await;
        result
    }

    /// Verify the executor can run jobs against the configured cluster by
    /// driving a throwaway pod through the full container sequence.
    pub async fn test(
        &self,
        image: &str,
        job_log: &dyn JobLogger,
        cancel: &CancellationToken,
    ) -> ExecuteResult<()> {
        self.check_cluster(job_log).await?;

        let namespace = namespace::namespace_name(&self.config.namespace_prefix, None);
        namespace::create(&self.kubectl, &namespace, job_log).await?;

        let result = self
            .run_job(&namespace, TEST_JOB_TOKEN, image, None, job_log, cancel)
            .await;

        namespace::delete(&self.kubectl, &namespace, job_log).await;
        result
    }

    async fn check_cluster(&self, job_log: &dyn JobLogger) -> ExecuteResult<()> {
        job_log.log("Checking cluster access...");
        self.kubectl.run(["cluster-info"], job_log).await?;
        Ok(())
    }

    /// The guarded region of a run; the caller owns namespace teardown.
    async fn run_job(
        &self,
        namespace: &str,
        job_token: &str,
        image: &str,
        mut ctx: Option<&mut JobContext>,
        job_log: &dyn JobLogger,
        cancel: &CancellationToken,
    ) -> ExecuteResult<()> {
        let kubectl = &self.kubectl;
        let test_mode = ctx.is_none();

        let pull_secret = if self.config.registry_logins.is_empty() {
            None
        } else {
            let (secret, masks) = image_pull_secret(namespace, &self.config.registry_logins)?;
            kubectl.create(&render(&secret)?, &masks, job_log).await?;
            Some(IMAGE_PULL_SECRET_NAME)
        };

        let baseline =
            os::resolve_baseline(kubectl, &self.config.node_selector, job_log).await?;
        info!(
            target: "kapsel.executor",
            os = ?baseline.family,
            kernel = %baseline.kernel_version,
            "resolved node baseline"
        );

        if let Some(ctx) = ctx.as_deref() {
            for svc in &ctx.services {
                service::start_service(
                    kubectl,
                    namespace,
                    svc,
                    &self.config,
                    &baseline,
                    pull_secret,
                    job_log,
                    cancel,
                )
                .await?;
            }
        }

        let trust_certs = match trust_certs_config_map(namespace, &self.server)? {
            Some(map) => {
                kubectl.create(&render(&map)?, &[], job_log).await?;
                true
            }
            None => false,
        };

        let pod = job_pod(&JobPodParams {
            namespace,
            image,
            job_token,
            server_url: &self.server.server_url,
            baseline: &baseline,
            cpu_request: ctx.as_deref().map(|ctx| ctx.cpu_request.as_str()),
            memory_request: ctx.as_deref().map(|ctx| ctx.memory_request.as_str()),
            node_selector: &self.config.node_selector,
            cache_specs: ctx
                .as_deref()
                .map(|ctx| ctx.cache_specs.as_slice())
                .unwrap_or(&[]),
            image_pull_secret: pull_secret,
            service_account: self.config.service_account.as_deref(),
            trust_certs,
            test_mode,
        });
        kubectl
            .create(&render(&pod)?, &[job_token.to_string()], job_log)
            .await?;

        watch_events(kubectl, namespace, JOB_POD_NAME, job_log, cancel)
            .await
            .map_err(ExecuteError::from_event)?;

        watch_pod(
            kubectl,
            namespace,
            JOB_POD_NAME,
            |status| {
                if container_started(status.get("initContainerStatuses"), INIT_CONTAINER) {
                    StatusCheck::Done
                } else {
                    StatusCheck::Continue
                }
            },
            job_log,
            cancel,
        )
        .await
        .map_err(ExecuteError::from_watch)?;

        if let Some(ctx) = ctx.as_deref() {
            ctx.notify_running();
        }

        let node_name = kubectl
            .run(
                [
                    "get",
                    "pod",
                    JOB_POD_NAME,
                    "-n",
                    namespace,
                    "-o",
                    "jsonpath={.spec.nodeName}",
                ],
                job_log,
            )
            .await?
            .into_iter()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        info!(target: "kapsel.executor", node = %node_name, "job pod scheduled");

        collect_logs_bounded(
            kubectl,
            namespace,
            JOB_POD_NAME,
            INIT_CONTAINER,
            LOG_END_MESSAGE,
            job_log,
            cancel,
        )
        .await?;

        if self.config.create_cache_labels
            && let Some(ctx) = ctx.as_deref_mut()
        {
            cache::reconcile(kubectl, &node_name, ctx, job_log).await?;
        }

        watch_pod(
            kubectl,
            namespace,
            JOB_POD_NAME,
            |status| {
                let init = status.get("initContainerStatuses");
                if let Some(err) = container_error(init, INIT_CONTAINER) {
                    return StatusCheck::Fail(format!("Error executing init logic: {err}"));
                }
                if container_started(status.get("containerStatuses"), MAIN_CONTAINER) {
                    StatusCheck::Done
                } else {
                    StatusCheck::Continue
                }
            },
            job_log,
            cancel,
        )
        .await
        .map_err(ExecuteError::from_watch)?;

        collect_logs_bounded(
            kubectl,
            namespace,
            JOB_POD_NAME,
            MAIN_CONTAINER,
            LOG_END_MESSAGE,
            job_log,
            cancel,
        )
        .await?;

        watch_pod(
            kubectl,
            namespace,
            JOB_POD_NAME,
            |status| {
                if container_started(status.get("containerStatuses"), SIDECAR_CONTAINER) {
                    StatusCheck::Done
                } else {
                    StatusCheck::Continue
                }
            },
            job_log,
            cancel,
        )
        .await
        .map_err(ExecuteError::from_watch)?;

        collect_logs_bounded(
            kubectl,
            namespace,
            JOB_POD_NAME,
            SIDECAR_CONTAINER,
            LOG_END_MESSAGE,
            job_log,
            cancel,
        )
        .await?;

        watch_pod(
            kubectl,
            namespace,
            JOB_POD_NAME,
            |status| {
                let containers = status.get("containerStatuses");
                if let Some(err) = container_error(containers, MAIN_CONTAINER) {
                    return StatusCheck::Fail(err);
                }
                if let Some(err) = container_error(containers, SIDECAR_CONTAINER) {
                    return StatusCheck::Fail(format!("Error executing sidecar logic: {err}"));
                }
                if container_stopped(containers, SIDECAR_CONTAINER) {
                    StatusCheck::Done
                } else {
                    StatusCheck::Continue
                }
            },
            job_log,
            cancel,
        )
        .await
        .map_err(ExecuteError::from_watch)?;

        if self.config.create_cache_labels
            && let Some(ctx) = ctx.as_deref_mut()
        {
            cache::reconcile(kubectl, &node_name, ctx, job_log).await?;
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::{Duration, Instant};

    use serde_json::json;

    use kapsel_model::BufferedJobLogger;

    /// Stand-in control-plane binary: records every invocation, serves
    /// canned node/pod/event documents, and emits the log sentinel so
    /// bounded follows end. Watch invocations read a counter file so each
    /// phase sees the next pod snapshot.
    fn install_fake_kubectl(dir: &Path, pod_snapshots: &[serde_json::Value]) {
        let nodes = json!({ "items": [{
            "spec": {},
            "status": { "nodeInfo": {
                "operatingSystem": "linux",
                "kernelVersion": "5.15.0",
            }},
        }]});
        fs::write(dir.join("nodes.json"), nodes.to_string()).unwrap();

        let event = json!({
            "type": "Normal",
            "reason": "Started",
            "message": "Started container init",
        });
        // The trailing newline matters: the stream stays open after `cat`,
        // so the closing brace must arrive as a complete line.
        fs::write(
            dir.join("event.json"),
            format!("{}\n", serde_json::to_string_pretty(&event).unwrap()),
        )
        .unwrap();

        for (i, snapshot) in pod_snapshots.iter().enumerate() {
            fs::write(
                dir.join(format!("pod{}.json", i + 1)),
                format!("{}\n", serde_json::to_string_pretty(snapshot).unwrap()),
            )
            .unwrap();
        }

        let script = format!(
            r#"#!/bin/sh
dir="{dir}"
echo "$*" >> "$dir/calls.log"
case "$*" in
    cluster-info*) exit 0 ;;
    "get namespaces"*) exit 0 ;;
    "create namespace"*) echo "namespace created"; exit 0 ;;
    "delete namespace"*) exit 0 ;;
    "get nodes"*) cat "$dir/nodes.json"; exit 0 ;;
    "create -f"*) cat > /dev/null; echo job; exit 0 ;;
    "get event"*) cat "$dir/event.json"; sleep 60 ;;
    "get pod job"*--watch*)
        n=$(cat "$dir/watch.count" 2>/dev/null || echo 0)
        n=$((n + 1))
        echo "$n" > "$dir/watch.count"
        cat "$dir/pod$n.json"
        sleep 60
        ;;
    *jsonpath*) echo node-1; exit 0 ;;
    logs*) echo "2024-05-01T10:00:00Z === kapsel: end of log ==="; sleep 60 ;;
    *) exit 0 ;;
esac
"#,
            dir = dir.display()
        );
        let path = dir.join("fake-kubectl");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn executor(dir: &Path) -> Executor {
        let config = ExecutorConfig {
            kubectl_path: Some(dir.join("fake-kubectl")),
            ..ExecutorConfig::default()
        };
        let server = ServerSettings {
            server_url: "https://kapsel.example.com".into(),
            keystore_file: None,
            trust_certs_dir: None,
        };
        Executor::new(config, server)
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn running(name: &str) -> serde_json::Value {
        json!({ "name": name, "state": { "running": {} } })
    }

    fn completed(name: &str) -> serde_json::Value {
        json!({ "name": name, "state": { "terminated": { "reason": "Completed" } } })
    }

    #[tokio::test]
    async fn self_test_runs_all_phases_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_kubectl(
            dir.path(),
            &[
                json!({ "status": { "initContainerStatuses": [running("init")] } }),
                json!({ "status": {
                    "initContainerStatuses": [completed("init")],
                    "containerStatuses": [running("main")],
                }}),
                json!({ "status": {
                    "containerStatuses": [running("main"), running("sidecar")],
                }}),
                json!({ "status": {
                    "containerStatuses": [completed("main"), completed("sidecar")],
                }}),
            ],
        );

        let log = BufferedJobLogger::new();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        executor(dir.path())
            .test("alpine:3.20", &log, &cancel)
            .await
            .unwrap();
        // Verdicts come from the streamed documents, not from EOF timing.
        assert!(start.elapsed() < Duration::from_secs(30));

        let calls = calls(dir.path());
        let creates = calls
            .iter()
            .filter(|c| c.starts_with("create namespace"))
            .count();
        let deletes = calls
            .iter()
            .filter(|c| c.starts_with("delete namespace"))
            .count();
        assert_eq!(creates, 1);
        assert_eq!(deletes, 1);
        assert!(calls.iter().any(|c| c.contains("jsonpath={.spec.nodeName}")));
        // Four watch phases, three bounded log follows.
        assert_eq!(
            calls.iter().filter(|c| c.contains("--watch -o json") && c.starts_with("get pod")).count(),
            4
        );
        assert_eq!(calls.iter().filter(|c| c.starts_with("logs")).count(), 3);
    }

    #[tokio::test]
    async fn init_failure_is_classified_and_namespace_still_deleted() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_kubectl(
            dir.path(),
            &[
                json!({ "status": { "initContainerStatuses": [running("init")] } }),
                json!({ "status": { "initContainerStatuses": [{
                    "name": "init",
                    "state": { "terminated": { "reason": "Error", "exitCode": 1 } },
                }]}}),
            ],
        );

        let log = BufferedJobLogger::new();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let err = executor(dir.path())
            .test("alpine:3.20", &log, &cancel)
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(30));

        match err {
            ExecuteError::Container(msg) => {
                assert!(msg.starts_with("Error executing init logic:"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
        let calls = calls(dir.path());
        assert_eq!(
            calls
                .iter()
                .filter(|c| c.starts_with("delete namespace"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_watch_phase() {
        let dir = tempfile::tempdir().unwrap();
        // First watch snapshot never reports the init container, so the run
        // parks in the first pod watch until cancelled.
        install_fake_kubectl(dir.path(), &[json!({ "status": {} })]);

        let log = BufferedJobLogger::new();
        let cancel = CancellationToken::new();
        let exec = executor(dir.path());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let err = exec.test("alpine:3.20", &log, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Cancelled));
        assert_eq!(
            calls(dir.path())
                .iter()
                .filter(|c| c.starts_with("delete namespace"))
                .count(),
            1
        );
    }
}


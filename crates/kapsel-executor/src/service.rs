use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kapsel_kubectl::{Kubectl, collect_logs_unbounded, watch_events};
use kapsel_kubectl::watch::{container_error, container_started, container_stopped};
use kapsel_manifest::{ServicePodParams, render, headless_service, service_pod, service_pod_name};
use kapsel_model::{ExecutorConfig, JobLogger, JobService, OsBaseline};

use crate::error::{ExecuteError, ExecuteResult};

/// Interval between service pod status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

const SERVICE_CONTAINER: &str = "default";

/// Start one job service and block until its readiness command passes.
///
/// The pod is exposed to the job through a headless service under the
/// service's own name. If the container terminates before becoming ready its
/// log is surfaced and the service is reported stopped.
pub async fn start_service(
    kubectl: &Kubectl,
    namespace: &str,
    service: &JobService,
    config: &ExecutorConfig,
    baseline: &OsBaseline,
    image_pull_secret: Option<&str>,
    job_log: &dyn JobLogger,
    cancel: &CancellationToken,
) -> ExecuteResult<()> {
    job_log.log(&format!("Starting service (name: {}, image: {})...", service.name, service.image));

    let locator = config
        .service_locators
        .iter()
        .find(|locator| locator.is_applicable(service));
    let node_selector = locator
        .map(|locator| locator.node_selector.as_slice())
        .unwrap_or(&config.node_selector);

    let pod = service_pod(&ServicePodParams {
        namespace,
        service,
        node_selector,
        image_pull_secret,
        service_account: config.service_account.as_deref(),
    });
    kubectl.create(&render(&pod)?, &[], job_log).await?;
    let manifest = headless_service(namespace, &service.name);
    kubectl.create(&render(&manifest)?, &[], job_log).await?;

    let pod_name = service_pod_name(&service.name);
    watch_events(kubectl, namespace, &pod_name, job_log, cancel)
        .await
        .map_err(ExecuteError::from_event)?;

    info!(target: "kapsel.executor.service", service = %service.name, "waiting for readiness");
    loop {
        if cancel.is_cancelled() {
            return Err(ExecuteError::Cancelled);
        }

        let doc = kubectl
            .run_json(
                ["get", "pod", pod_name.as_str(), "-n", namespace, "-o", "json"],
                job_log,
            )
            .await?;
        let statuses = doc["status"].get("containerStatuses");

        if let Some(reason) = container_error(statuses, SERVICE_CONTAINER) {
            job_log.log(&format!("Service {} failed: {reason}", service.name));
            collect_logs_unbounded(kubectl, namespace, &pod_name, SERVICE_CONTAINER, job_log, cancel)
                .await?;
            return Err(ExecuteError::ServiceUnavailable(format!(
                "Service '{}' is stopped unexpectedly",
                service.name
            )));
        }
        if container_stopped(statuses, SERVICE_CONTAINER) {
            collect_logs_unbounded(kubectl, namespace, &pod_name, SERVICE_CONTAINER, job_log, cancel)
                .await?;
            return Err(ExecuteError::ServiceUnavailable(format!(
                "Service '{}' is stopped unexpectedly",
                service.name
            )));
        }

        if container_started(statuses, SERVICE_CONTAINER)
            && readiness_passed(kubectl, namespace, &pod_name, service, baseline, job_log).await?
        {
            job_log.log(&format!("Service {} is ready", service.name));
            return Ok(());
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = cancel.cancelled() => return Err(ExecuteError::Cancelled),
        }
    }
}

/// Run the readiness command inside the service container once.
async fn readiness_passed(
    kubectl: &Kubectl,
    namespace: &str,
    pod_name: &str,
    service: &JobService,
    baseline: &OsBaseline,
    job_log: &dyn JobLogger,
) -> ExecuteResult<bool> {
    let (shell, flag) = if baseline.is_linux() {
        ("bash", "-c")
    } else {
        ("cmd.exe", "/c")
    };
    let out = kubectl
        .run_unchecked([
            "exec",
            pod_name,
            "-n",
            namespace,
            "-c",
            SERVICE_CONTAINER,
            "--",
            shell,
            flag,
            service.readiness_check_command.as_str(),
        ])
        .await?;
    for line in out.stdout.iter().chain(out.stderr.iter()) {
        job_log.log(line);
    }
    if !out.success() {
        debug!(
            target: "kapsel.executor.service",
            service = %service.name,
            code = out.code,
            "readiness check not passed yet"
        );
    }
    Ok(out.success())
}

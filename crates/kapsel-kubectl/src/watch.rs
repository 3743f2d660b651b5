use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use kapsel_model::JobLogger;

use crate::cli::{Kubectl, kill_graceful};
use crate::decode::DocDecoder;
use crate::error::{KubectlError, KubectlResult};

/// Verdict of one status-snapshot evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCheck {
    /// Keep watching.
    Continue,
    /// Terminal success.
    Done,
    /// Terminal failure with a reason.
    Fail(String),
}

/// Waiting-state reasons that mean the image can never be run.
const BAD_IMAGE_REASONS: [&str; 5] = [
    "ErrImagePull",
    "InvalidImageName",
    "ImageInspectError",
    "ErrImageNeverPull",
    "RegistryUnavailable",
];

/// Watch a pod until the checker reaches a verdict.
///
/// Streams `get pod --watch -o json` and evaluates every complete status
/// snapshot: image waiting-state failures win over the caller predicate,
/// unschedulable conditions are surfaced to the job log without stopping the
/// watch. The watch has no natural end, so a verdict (or external
/// cancellation) kills the underlying process; a stream that ends on its own
/// is an error.
pub async fn watch_pod<F>(
    kubectl: &Kubectl,
    namespace: &str,
    pod: &str,
    mut checker: F,
    job_log: &dyn JobLogger,
    cancel: &CancellationToken,
) -> KubectlResult<()>
where
    F: FnMut(&Value) -> StatusCheck,
{
    let args = [
        "get", "pod", pod, "-n", namespace, "--watch", "-o", "json",
    ];
    watch_stream(
        kubectl,
        args,
        |doc| {
            trace!(target: "kapsel.kubectl.watch", pod, "pod snapshot received");
            evaluate_pod_doc(doc, &mut checker, job_log)
        },
        job_log,
        cancel,
        "unexpected end of pod watch",
    )
    .await
}

/// Drive one `--watch` invocation: decode documents off stdout, surface
/// stderr to the job log, and stop at the first verdict `on_doc` returns.
///
/// A verdict or external cancellation kills the child; incidental faults
/// raised while tearing down the cancelled read never outrank the verdict.
/// A stream that ends on its own is an error.
pub(crate) async fn watch_stream<I, S, F>(
    kubectl: &Kubectl,
    args: I,
    mut on_doc: F,
    job_log: &dyn JobLogger,
    cancel: &CancellationToken,
    end_context: &str,
) -> KubectlResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
    F: FnMut(&Value) -> Option<KubectlResult<()>>,
{
    let mut child = kubectl.spawn_streaming(args)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| KubectlError::Spawn("stdout not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| KubectlError::Spawn("stderr not piped".into()))?;
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    let mut decoder = DocDecoder::new();
    let mut stderr_open = true;
    let mut verdict: Option<KubectlResult<()>> = None;

    loop {
        tokio::select! {
            line = out_lines.next_line() => match line {
                Ok(Some(line)) => match decoder.push(&line) {
                    Ok(Some(doc)) => {
                        if let Some(v) = on_doc(&doc) {
                            verdict = Some(v);
                            break;
                        }
                    }
                    Ok(None) => {}
                    // Faults in a single document are diagnostic; keep watching.
                    Err(e) => debug!(target: "kapsel.kubectl.watch", "skipping document: {e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    verdict = Some(Err(e.into()));
                    break;
                }
            },
            line = err_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => job_log.log(&format!("Kubernetes: {line}")),
                _ => stderr_open = false,
            },
            _ = cancel.cancelled() => {
                verdict = Some(Err(KubectlError::Cancelled));
                break;
            }
        }
    }

    match verdict {
        Some(v) => {
            let _ = kill_graceful(&mut child).await;
            v
        }
        None => {
            let status = child.wait().await?;
            if status.success() {
                Err(KubectlError::StreamEnded(end_context.to_string()))
            } else {
                Err(KubectlError::NonZeroExit {
                    code: status.code().unwrap_or(-1),
                    stderr: Vec::new(),
                })
            }
        }
    }
}

/// Evaluate one pod document; `None` keeps the watch open.
fn evaluate_pod_doc<F>(
    doc: &Value,
    checker: &mut F,
    job_log: &dyn JobLogger,
) -> Option<KubectlResult<()>>
where
    F: FnMut(&Value) -> StatusCheck,
{
    let status = doc.get("status")?;

    if let Some(conditions) = status.get("conditions").and_then(Value::as_array) {
        for condition in conditions {
            if condition["type"] == "PodScheduled"
                && condition["status"] == "False"
                && condition["reason"] == "Unschedulable"
                && let Some(message) = condition["message"].as_str()
            {
                job_log.log(&format!("Kubernetes: {message}"));
            }
        }
    }

    if let Some(message) = image_error(status) {
        return Some(Err(KubectlError::Image(message)));
    }

    match checker(status) {
        StatusCheck::Continue => None,
        StatusCheck::Done => Some(Ok(())),
        StatusCheck::Fail(reason) => Some(Err(KubectlError::Status(reason))),
    }
}

/// Scan all container statuses for an unrecoverable image waiting state.
fn image_error(status: &Value) -> Option<String> {
    let statuses = ["initContainerStatuses", "containerStatuses"]
        .iter()
        .filter_map(|section| status.get(*section))
        .filter_map(Value::as_array)
        .flatten();

    for container in statuses {
        let waiting = &container["state"]["waiting"];
        if let Some(reason) = waiting["reason"].as_str()
            && BAD_IMAGE_REASONS.contains(&reason)
        {
            let message = waiting["message"]
                .as_str()
                .unwrap_or(reason)
                .to_string();
            return Some(message);
        }
    }
    None
}

/// Failure reason of a terminated container, if any.
///
/// Preference order: message over reason over non-zero exit code, with a
/// fallback when the container terminated without saying why. A clean
/// `Completed` termination is not an error.
pub fn container_error(statuses: Option<&Value>, name: &str) -> Option<String> {
    let state = container_state(statuses, name)?;
    let terminated = state.get("terminated")?;

    let reason = terminated["reason"]
        .as_str()
        .unwrap_or("terminated for unknown reason");
    if reason == "Completed" {
        return None;
    }

    if let Some(message) = terminated["message"].as_str() {
        return Some(message.to_string());
    }
    if let Some(code) = terminated["exitCode"].as_i64()
        && code != 0
    {
        return Some(format!("exit code: {code}"));
    }
    Some(reason.to_string())
}

/// A container counts as started once it is running or already terminated.
pub fn container_started(statuses: Option<&Value>, name: &str) -> bool {
    container_state(statuses, name)
        .map(|state| state.get("running").is_some() || state.get("terminated").is_some())
        .unwrap_or(false)
}

pub fn container_stopped(statuses: Option<&Value>, name: &str) -> bool {
    container_state(statuses, name)
        .map(|state| state.get("terminated").is_some())
        .unwrap_or(false)
}

fn container_state<'a>(statuses: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    statuses?
        .as_array()?
        .iter()
        .find(|status| status["name"] == name)
        .map(|status| &status["state"])
}

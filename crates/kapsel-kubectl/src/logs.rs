use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kapsel_model::JobLogger;

use crate::cli::{Kubectl, kill_graceful};
use crate::error::{KubectlError, KubectlResult};

/// Pause before reissuing a dropped follow call.
const RESUME_BACKOFF: Duration = Duration::from_secs(1);

/// Stream a container's log until the end-of-log sentinel appears.
///
/// Follow calls can drop mid-stream; each reissue resumes from the last
/// observed timestamp via `--since-time`, and lines stamped at or before the
/// resume point are suppressed so nothing is emitted twice. Timestamps are
/// bookkeeping only and are stripped before lines reach the job log.
pub async fn collect_logs_bounded(
    kubectl: &Kubectl,
    namespace: &str,
    pod: &str,
    container: &str,
    sentinel: &str,
    job_log: &dyn JobLogger,
    cancel: &CancellationToken,
) -> KubectlResult<()> {
    let mut cursor: Option<OffsetDateTime> = None;

    loop {
        let mut args = vec![
            "logs".to_string(),
            pod.to_string(),
            "-c".to_string(),
            container.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "--follow".to_string(),
            "--timestamps=true".to_string(),
        ];
        let resume_floor = cursor;
        if let Some(since) = resume_floor {
            let stamp = since
                .format(&Rfc3339)
                .map_err(|e| KubectlError::Decode(e.to_string()))?;
            args.push(format!("--since-time={stamp}"));
        }

        let outcome = follow_once(
            kubectl,
            &args,
            |line| {
                if is_transient_log_line(line) {
                    debug!(target: "kapsel.kubectl.logs", container, "{line}");
                    return false;
                }
                if line.contains(sentinel) {
                    return true;
                }
                match split_timestamp(line) {
                    Some((stamp, content)) => {
                        // --since-time is inclusive; drop what we already saw.
                        if resume_floor.is_some_and(|floor| stamp <= floor) {
                            return false;
                        }
                        if cursor.is_none_or(|last| last < stamp) {
                            cursor = Some(stamp);
                        }
                        job_log.log(content);
                        false
                    }
                    None => {
                        job_log.log(line);
                        false
                    }
                }
            },
            cancel,
        )
        .await?;

        match outcome {
            FollowOutcome::SentinelSeen => return Ok(()),
            FollowOutcome::StreamEnded => {
                tokio::time::sleep(RESUME_BACKOFF).await;
            }
        }
    }
}

/// Stream a container's log for its whole lifetime, no sentinel.
///
/// Known transient retrieval races are diagnostic only; everything else is
/// forwarded as-is (lines are not timestamped in this mode).
pub async fn collect_logs_unbounded(
    kubectl: &Kubectl,
    namespace: &str,
    pod: &str,
    container: &str,
    job_log: &dyn JobLogger,
    cancel: &CancellationToken,
) -> KubectlResult<()> {
    let args = [
        "logs", pod, "-c", container, "-n", namespace, "--follow",
    ];
    follow_once(
        kubectl,
        &args.map(str::to_string),
        |line| {
            if is_transient_log_line(line) {
                debug!(target: "kapsel.kubectl.logs", container, "{line}");
            } else {
                job_log.log(line);
            }
            false
        },
        cancel,
    )
    .await?;
    Ok(())
}

enum FollowOutcome {
    SentinelSeen,
    StreamEnded,
}

/// Run one follow invocation, feeding every line from either pipe to
/// `on_line`; a `true` return means the sentinel was seen and the follow is
/// killed. Non-zero exit of the invocation itself is fatal.
async fn follow_once<F>(
    kubectl: &Kubectl,
    args: &[String],
    mut on_line: F,
    cancel: &CancellationToken,
) -> KubectlResult<FollowOutcome>
where
    F: FnMut(&str) -> bool,
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

    let mut stderr_open = true;
    loop {
        tokio::select! {
            line = out_lines.next_line() => match line {
                Ok(Some(line)) => {
                    if on_line(&line) {
                        let _ = kill_graceful(&mut child).await;
                        return Ok(FollowOutcome::SentinelSeen);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = kill_graceful(&mut child).await;
                    return Err(e.into());
                }
            },
            line = err_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    if on_line(&line) {
                        let _ = kill_graceful(&mut child).await;
                        return Ok(FollowOutcome::SentinelSeen);
                    }
                }
                _ => stderr_open = false,
            },
            _ = cancel.cancelled() => {
                let _ = kill_graceful(&mut child).await;
                return Err(KubectlError::Cancelled);
            }
        }
    }

    let status = child.wait().await?;
    if status.success() {
        Ok(FollowOutcome::StreamEnded)
    } else {
        Err(KubectlError::NonZeroExit {
            code: status.code().unwrap_or(-1),
            stderr: Vec::new(),
        })
    }
}

/// Split a source-timestamped line into its timestamp and content.
fn split_timestamp(line: &str) -> Option<(OffsetDateTime, &str)> {
    let (stamp, content) = line.split_once(' ')?;
    let parsed = OffsetDateTime::parse(stamp, &Rfc3339).ok()?;
    Some((parsed, content))
}

/// Log-retrieval races the container runtime resolves on its own.
fn is_transient_log_line(line: &str) -> bool {
    (line.contains("rpc error:") && line.contains("No such container:"))
        || line.contains("Unable to retrieve container logs for")
}

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use kapsel_model::JobLogger;

use crate::cli::Kubectl;
use crate::error::{KubectlError, KubectlResult};
use crate::watch::watch_stream;

/// Watch a pod's event stream until it settles.
///
/// Some scheduling and runtime failures are only reported as events.
/// Classification: `Warning`+`FailedScheduling` is transient and logged,
/// any other `Warning` is fatal, `Normal`+`Started` means the container is
/// up and the check is done.
pub async fn watch_events(
    kubectl: &Kubectl,
    namespace: &str,
    pod: &str,
    job_log: &dyn JobLogger,
    cancel: &CancellationToken,
) -> KubectlResult<()> {
    let field_selector = format!("involvedObject.kind=Pod,involvedObject.name={pod}");
    let args = [
        "get",
        "event",
        "-n",
        namespace,
        "--field-selector",
        field_selector.as_str(),
        "--watch",
        "-o",
        "json",
    ];
    watch_stream(
        kubectl,
        args,
        |doc| evaluate_event_doc(doc, job_log),
        job_log,
        cancel,
        "unexpected end of event watch",
    )
    .await
}

fn evaluate_event_doc(doc: &Value, job_log: &dyn JobLogger) -> Option<KubectlResult<()>> {
    let event_type = doc["type"].as_str()?;
    let reason = doc["reason"].as_str()?;
    let message = doc["message"].as_str().unwrap_or(reason);

    match (event_type, reason) {
        ("Warning", "FailedScheduling") => {
            job_log.log(&format!("Kubernetes: {message}"));
            None
        }
        ("Warning", _) => Some(Err(KubectlError::Status(message.to_string()))),
        ("Normal", "Started") => Some(Ok(())),
        _ => None,
    }
}

use thiserror::Error;

use kapsel_kubectl::KubectlError;
use kapsel_manifest::ManifestError;

pub type ExecuteResult<T> = Result<T, ExecuteError>;

#[derive(Error, Debug)]
pub enum ExecuteError {
    /// Executor or fleet configuration rules out running the job at all.
    #[error("{0}")]
    Configuration(String),
    #[error(transparent)]
    ControlPlane(#[from] KubectlError),
    /// The pod could not be placed on any node.
    #[error("{0}")]
    Scheduling(String),
    /// The image can never be pulled or resolved.
    #[error("{0}")]
    Image(String),
    /// A job container terminated abnormally.
    #[error("{0}")]
    Container(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("cancelled")]
    Cancelled,
}

impl ExecuteError {
    /// Lift a pod-watch fault: image verdicts and container verdicts carry
    /// their own category, cancellation stays cancellation.
    pub(crate) fn from_watch(err: KubectlError) -> Self {
        match err {
            KubectlError::Image(msg) => ExecuteError::Image(msg),
            KubectlError::Status(msg) => ExecuteError::Container(msg),
            KubectlError::Cancelled => ExecuteError::Cancelled,
            other => ExecuteError::ControlPlane(other),
        }
    }

    /// Lift an event-watch fault: warning events report scheduling and
    /// runtime placement problems.
    pub(crate) fn from_event(err: KubectlError) -> Self {
        match err {
            KubectlError::Image(msg) => ExecuteError::Image(msg),
            KubectlError::Status(msg) => ExecuteError::Scheduling(msg),
            KubectlError::Cancelled => ExecuteError::Cancelled,
            other => ExecuteError::ControlPlane(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_faults_keep_their_category() {
        let image = ExecuteError::from_watch(KubectlError::Image("bad tag".into()));
        assert!(matches!(image, ExecuteError::Image(_)));

        let container = ExecuteError::from_watch(KubectlError::Status("OOMKilled".into()));
        assert!(matches!(container, ExecuteError::Container(_)));

        let cancelled = ExecuteError::from_watch(KubectlError::Cancelled);
        assert!(matches!(cancelled, ExecuteError::Cancelled));
    }

    #[test]
    fn event_faults_report_scheduling() {
        let err = ExecuteError::from_event(KubectlError::Status("no nodes available".into()));
        assert!(matches!(err, ExecuteError::Scheduling(_)));
    }
}

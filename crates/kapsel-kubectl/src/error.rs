use thiserror::Error;

pub type KubectlResult<T> = Result<T, KubectlError>;

#[derive(Error, Debug)]
pub enum KubectlError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("non-zero exit code: {code}{}", stderr_context(.stderr))]
    NonZeroExit { code: i32, stderr: Vec<String> },
    #[error("malformed document: {0}")]
    Decode(String),
    #[error("{0}")]
    StreamEnded(String),
    /// Container image could not be pulled, inspected or resolved.
    #[error("{0}")]
    Image(String),
    /// Terminal failure verdict from a watch predicate or event stream.
    #[error("{0}")]
    Status(String),
    #[error("cancelled")]
    Cancelled,
}

fn stderr_context(stderr: &[String]) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr.join("; "))
    }
}

use kapsel_model::JobLogger;

/// Job logger that routes build output into the process-wide subscriber
/// under its own target, so job lines stay filterable from executor
/// diagnostics.
#[derive(Debug, Default, Clone)]
pub struct TracingJobLogger;

impl TracingJobLogger {
    pub fn new() -> Self {
        Self
    }
}

impl JobLogger for TracingJobLogger {
    fn log(&self, line: &str) {
        tracing::info!(target: "kapsel.job", "{line}");
    }
}

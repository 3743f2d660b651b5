use std::sync::Mutex;

/// Sink for the build log of one job run.
///
/// Everything a user should see goes through this seam; executor
/// diagnostics stay on the tracing side.
pub trait JobLogger: Send + Sync {
    fn log(&self, line: &str);
}

/// In-memory logger collecting lines, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct BufferedJobLogger {
    lines: Mutex<Vec<String>>,
}

impl BufferedJobLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

impl JobLogger for BufferedJobLogger {
    fn log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::trace;

use kapsel_model::{JobLogger, SECRET_MASK};

use crate::error::{KubectlError, KubectlResult};

/// Builds and runs control-plane command invocations.
///
/// Binary path defaults to `kubectl` resolved from the search path; an
/// explicit kubeconfig is injected as `--kubeconfig` on every invocation.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
}

/// Captured result of one finished invocation.
#[derive(Debug)]
pub struct CmdOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub code: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

impl Kubectl {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("kubectl"),
            kubeconfig: None,
        }
    }

    pub fn from_config(kubectl_path: Option<&Path>, config_file: Option<&Path>) -> Self {
        let mut kubectl = Self::new();
        if let Some(path) = kubectl_path {
            kubectl.binary = path.to_path_buf();
        }
        kubectl.kubeconfig = config_file.map(Path::to_path_buf);
        kubectl
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Spawn a long-lived invocation (watch or follow) with piped streams.
    ///
    /// The caller owns the child and must kill it once a verdict is reached;
    /// these invocations have no natural end of their own.
    pub(crate) fn spawn_streaming<I, S>(&self, args: I) -> KubectlResult<Child>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn().map_err(|e| KubectlError::Spawn(e.to_string()))
    }

    /// Run to completion, capturing output without any exit-code check.
    pub async fn run_unchecked<I, S>(&self, args: I) -> KubectlResult<CmdOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let child = self.spawn_streaming(args)?;
        collect(child, None).await
    }

    /// Run to completion; stdout lines are returned, stderr lines are
    /// surfaced to the job log. Non-zero exit is fatal.
    pub async fn run<I, S>(&self, args: I, job_log: &dyn JobLogger) -> KubectlResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let child = self.spawn_streaming(args)?;
        let out = collect(child, Some(job_log)).await?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(KubectlError::NonZeroExit {
                code: out.code,
                stderr: out.stderr,
            })
        }
    }

    /// Run and parse the joined stdout as one JSON document.
    pub async fn run_json<I, S>(
        &self,
        args: I,
        job_log: &dyn JobLogger,
    ) -> KubectlResult<serde_json::Value>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let stdout = self.run(args, job_log).await?;
        serde_json::from_str(&stdout.join("\n")).map_err(|e| KubectlError::Decode(e.to_string()))
    }

    /// Run like [`Kubectl::run`], but accept a non-zero exit when any stderr
    /// line satisfies `tolerate` (e.g. a label removal on a vanished node).
    pub async fn run_tolerant<I, S, F>(
        &self,
        args: I,
        tolerate: F,
        job_log: &dyn JobLogger,
    ) -> KubectlResult<CmdOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
        F: Fn(&str) -> bool,
    {
        let child = self.spawn_streaming(args)?;
        let out = collect(child, Some(job_log)).await?;
        if out.success() || out.stderr.iter().any(|line| tolerate(line)) {
            Ok(out)
        } else {
            Err(KubectlError::NonZeroExit {
                code: out.code,
                stderr: out.stderr,
            })
        }
    }

    /// Create a cluster object from a serialized document fed via stdin,
    /// returning the created object's name.
    ///
    /// The document is trace-logged only after masking every secret literal.
    pub async fn create(
        &self,
        document: &str,
        secrets_to_mask: &[String],
        job_log: &dyn JobLogger,
    ) -> KubectlResult<String> {
        let mut masked = document.to_string();
        for secret in secrets_to_mask {
            masked = masked.replace(secret, SECRET_MASK);
        }
        trace!(target: "kapsel.kubectl", "creating resource:\n{masked}");

        let mut cmd = self.command(["create", "-f", "-", "-o", "jsonpath={.metadata.name}"]);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| KubectlError::Spawn(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(document.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let out = collect(child, Some(job_log)).await?;
        if !out.success() {
            return Err(KubectlError::NonZeroExit {
                code: out.code,
                stderr: out.stderr,
            });
        }
        out.stdout
            .into_iter()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| KubectlError::Decode("created object has no name".into()))
    }
}

/// Drain both pipes of a finished-or-finishing child and reap it.
///
/// Stderr lines are forwarded to the job log with a distinguishing prefix as
/// they arrive, and retained for error context.
async fn collect(mut child: Child, job_log: Option<&dyn JobLogger>) -> KubectlResult<CmdOutput> {
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

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            line = out_lines.next_line(), if stdout_open => match line? {
                Some(line) => stdout_buf.push(line),
                None => stdout_open = false,
            },
            line = err_lines.next_line(), if stderr_open => match line? {
                Some(line) => {
                    if let Some(log) = job_log {
                        log.log(&format!("Kubernetes: {line}"));
                    }
                    stderr_buf.push(line);
                }
                None => stderr_open = false,
            },
        }
    }

    let status = child.wait().await?;
    Ok(CmdOutput {
        stdout: stdout_buf,
        stderr: stderr_buf,
        code: status.code().unwrap_or(-1),
    })
}

/// Terminate a streaming child: polite signal first, then a hard kill.
#[cfg(unix)]
pub(crate) async fn kill_graceful(child: &mut Child) -> std::io::Result<()> {
    if let Some(id) = child.id() {
        // SAFETY: plain signal send to a pid we own.
        unsafe {
            libc::kill(id as i32, libc::SIGTERM);
        }
    }
    child.kill().await
}

#[cfg(not(unix))]
pub(crate) async fn kill_graceful(child: &mut Child) -> std::io::Result<()> {
    child.kill().await
}

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;

use kapsel_executor::Executor;
use kapsel_model::{ExecutorConfig, JobContext, ServerSettings};
use kapsel_observe::{LoggerConfig, TracingJobLogger, logger_init};

/// Drives one job (or the executor self-test) against a live cluster.
///
/// Usage:
///   runner <executor.json> <server.json> <job.json> <token>
///   runner <executor.json> <server.json> --test <image>
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger_init(&LoggerConfig::default())?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [config_path, server_path, job_or_flag, last] = args.as_slice() else {
        bail!("usage: runner <executor.json> <server.json> (<job.json> <token> | --test <image>)");
    };

    let config: ExecutorConfig = load_json(config_path.into())?;
    let server: ServerSettings = load_json(server_path.into())?;
    let executor = Executor::new(config, server);

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            canceller.cancel();
        }
    });

    let job_log = TracingJobLogger::new();
    if job_or_flag == "--test" {
        executor.test(last, &job_log, &cancel).await?;
        info!("executor self-test passed");
    } else {
        let mut ctx: JobContext = load_json(job_or_flag.into())?;
        executor.execute(last, &mut ctx, &job_log, &cancel).await?;
        info!("job finished");
    }
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: PathBuf) -> anyhow::Result<T> {
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

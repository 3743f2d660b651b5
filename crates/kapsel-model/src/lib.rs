mod env;
pub use env::{Env, EnvVar};

mod job;
pub use job::{CacheSpec, JobContext, JobService, RunningHook};

mod config;
pub use config::{
    ExecutorConfig, NodeSelectorEntry, RegistryLogin, ServerSettings, ServiceLocator,
};

mod logger;
pub use logger::{BufferedJobLogger, JobLogger};

mod os;
pub use os::{OsBaseline, OsFamily};

/// Reserved node-label prefix isolating cache-affinity bookkeeping.
pub const CACHE_LABEL_PREFIX: &str = "kapsel-cache/";

/// Environment variable carrying the server base url into helper containers.
pub const ENV_SERVER_URL: &str = "KAPSEL_SERVER_URL";

/// Environment variable carrying the one-time job token into helper containers.
pub const ENV_JOB_TOKEN: &str = "KAPSEL_JOB_TOKEN";

/// Sentinel line printed by helper containers when their log is complete.
pub const LOG_END_MESSAGE: &str = "=== kapsel: end of log ===";

/// Job token used when running the executor self-test without a job context.
pub const TEST_JOB_TOKEN: &str = "kapsel-executor-test";

/// Replacement string for credential literals in any logged manifest text.
pub const SECRET_MASK: &str = "*****";

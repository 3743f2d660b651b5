mod job_log;
pub mod logger;

pub use job_log::TracingJobLogger;
pub use logger::{LoggerConfig, LoggerError, LoggerFormat, logger_init};

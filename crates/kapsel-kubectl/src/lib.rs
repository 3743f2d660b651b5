mod error;
pub use error::{KubectlError, KubectlResult};

mod cli;
pub use cli::{CmdOutput, Kubectl};

mod decode;
pub use decode::DocDecoder;

pub mod watch;
pub use watch::{StatusCheck, watch_pod};

mod events;
pub use events::watch_events;

mod logs;
pub use logs::{collect_logs_bounded, collect_logs_unbounded};

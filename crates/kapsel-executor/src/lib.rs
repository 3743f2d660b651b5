mod error;
pub use error::{ExecuteError, ExecuteResult};

mod executor;
pub use executor::Executor;

pub mod cache;
pub mod namespace;
pub mod os;
pub mod service;

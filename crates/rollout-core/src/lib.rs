pub mod clients;
pub mod config;
pub mod credentials;
pub mod deploy;
pub mod diagnosis;
pub mod error;
pub mod io;
pub mod operator;
pub mod paths;
pub mod phase;
pub mod plan;
pub mod probe;
pub mod readiness;
pub mod secret_sync;
pub mod summary;
pub mod tool_runner;
pub mod types;

pub use error::{Result, RolloutError};

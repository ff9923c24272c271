//! Configuration parsing for cexec
//!
//! This crate handles the executor configuration file (`config.toml`):
//! - Runtime daemon connection and namespace
//! - Logging level, output directory and format
//! - Executor behaviour (enabled hooks, stop timeout)

mod error;
mod executor;
mod logging;

pub use error::*;
pub use executor::*;
pub use logging::*;

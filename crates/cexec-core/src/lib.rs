//! Container lifecycle manager for the cexec executor
//!
//! This crate provides:
//! - The spec builder turning a task description into runtime spec options
//! - The lifecycle manager driving create, run, wait, stop and remove
//! - Hook extension points around each transition
//! - A supervised one-shot run composing the whole lifecycle

mod error;
mod event;
mod hook;
mod manager;
mod spec;

pub use error::*;
pub use event::*;
pub use hook::*;
pub use manager::*;
pub use spec::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

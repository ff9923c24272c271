//! Library surface of the cexec binary, split out so commands can be tested
//! against an in-memory runtime.

pub mod commands;
pub mod logging;

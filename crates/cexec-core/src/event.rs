//! Lifecycle events reported to the status layer

use serde::Serialize;

/// A completed lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created { id: String },
    Started { id: String },
    Exited { id: String, code: u32 },
    Killed { id: String, code: u32 },
    TaskDeleted { id: String, code: u32 },
    Removed { id: String },
}

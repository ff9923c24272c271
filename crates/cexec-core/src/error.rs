//! Error types for cexec-core

use crate::HookStage;
use cexec_runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid task spec: {0}")]
    InvalidSpec(String),

    #[error("Failed to pull image {image}: {source}")]
    PullFailed {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("{op} {id}: not found")]
    NotFound { op: &'static str, id: String },

    #[error("Failed to deliver signal to task {id}: {source}")]
    SignalDeliveryFailed {
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("{op} {id} failed: {source}")]
    DaemonCallFailed {
        op: &'static str,
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Hook {hook} failed during {stage}: {message}")]
    Hook {
        hook: String,
        stage: HookStage,
        message: String,
    },

    #[error("Operation unavailable: {0}")]
    Unsupported(&'static str),
}

impl CoreError {
    /// Wrap a daemon failure with the operation and container it concerns
    pub(crate) fn daemon(op: &'static str, id: impl Into<String>, source: RuntimeError) -> Self {
        Self::DaemonCallFailed {
            op,
            id: id.into(),
            source,
        }
    }

    /// Like [`CoreError::daemon`], but a missing object becomes `NotFound`
    pub(crate) fn lookup(op: &'static str, id: impl Into<String>, source: RuntimeError) -> Self {
        if source.is_not_found() {
            Self::NotFound { op, id: id.into() }
        } else {
            Self::daemon(op, id, source)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

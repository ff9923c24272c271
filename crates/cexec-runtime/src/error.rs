//! Error types for runtime daemon clients

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to connect to runtime daemon: {0}")]
    ConnectionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Image pull failed: {0}")]
    PullError(String),

    #[error("Runtime daemon error: {0}")]
    DaemonError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as BollardError;

        match err {
            BollardError::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            BollardError::DockerResponseServerError {
                status_code: 409,
                message,
            } => Self::AlreadyExists(message),
            BollardError::IOError { err } => Self::IoError(err),
            other => Self::DaemonError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

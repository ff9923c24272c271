//! Common types shared by runtime daemon clients

use crate::{Result, RuntimeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Runtime-assigned container identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The running process of a container, as tracked by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Id of the container the task belongs to
    pub container_id: String,
}

impl TaskHandle {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
        }
    }
}

/// Process defaults baked into an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
}

impl ImageConfig {
    /// Full argv the image runs when nothing overrides it
    pub fn default_args(&self) -> Vec<String> {
        self.entrypoint.iter().chain(self.cmd.iter()).cloned().collect()
    }
}

/// A pulled and unpacked image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Reference the image was pulled by
    pub name: String,
    pub config: ImageConfig,
}

/// One option of a process specification. Options are applied in order,
/// each on top of the result of the previous ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecOpt {
    /// Seed args, env and cwd from the image; resets anything applied before it
    ImageConfig(ImageConfig),
    /// Replace the process argv
    ProcessArgs(Vec<String>),
    /// Memory limit in bytes (0 = unconstrained)
    MemoryLimit(u64),
    /// Relative CPU weight (0 = daemon default)
    CpuShares(u64),
}

/// Process specification resolved from a list of `SpecOpt`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: Option<String>,
    pub memory_limit: u64,
    pub cpu_shares: u64,
    /// True when the argv was replaced after the image config was applied
    pub args_overridden: bool,
}

impl ProcessSpec {
    pub fn from_opts(opts: &[SpecOpt]) -> Self {
        let mut spec = Self::default();
        for opt in opts {
            spec.apply(opt);
        }
        spec
    }

    fn apply(&mut self, opt: &SpecOpt) {
        match opt {
            SpecOpt::ImageConfig(config) => {
                self.args = config.default_args();
                self.env = config.env.clone();
                self.cwd = config.working_dir.clone();
                self.args_overridden = false;
            }
            SpecOpt::ProcessArgs(args) => {
                self.args = args.clone();
                self.args_overridden = true;
            }
            SpecOpt::MemoryLimit(bytes) => self.memory_limit = *bytes,
            SpecOpt::CpuShares(shares) => self.cpu_shares = *shares,
        }
    }
}

/// Where a task's standard streams go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoConfig {
    /// Forward to the calling process's stdout/stderr
    #[default]
    Stdio,
    /// Discard
    Null,
}

/// Task status as reported by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Pausing,
    Stopped,
    Unknown,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Pausing => write!(f, "pausing"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Exit information for a finished task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
    pub exited_at: Option<DateTime<Utc>>,
    /// Error the daemon attached to the exit, if any
    pub error: Option<String>,
}

impl ExitStatus {
    pub fn new(code: u32) -> Self {
        Self {
            code,
            exited_at: Some(Utc::now()),
            error: None,
        }
    }

    /// Exit code, or the daemon error if the exit could not be observed cleanly
    pub fn result(&self) -> Result<u32> {
        match &self.error {
            Some(e) => Err(RuntimeError::DaemonError(e.clone())),
            None => Ok(self.code),
        }
    }
}

/// Sending half of an exit notification, held by the client implementation
pub type ExitNotifier = oneshot::Sender<Result<ExitStatus>>;

/// Pending exit notification for a task.
///
/// Once `wait_task` has returned the waiter, an exit is delivered even if it
/// happens before the daemon has seen the wait request. The notification is
/// delivered exactly once.
#[derive(Debug)]
pub struct ExitWaiter {
    rx: oneshot::Receiver<Result<ExitStatus>>,
}

impl ExitWaiter {
    pub fn channel() -> (ExitNotifier, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Block until the task exits
    pub async fn wait(self) -> Result<ExitStatus> {
        self.rx.await.map_err(|_| {
            RuntimeError::DaemonError("exit notification dropped before delivery".to_string())
        })?
    }
}

//! Task description and the spec builder

use crate::{CoreError, Result};
use cexec_runtime::{Image, SpecOpt};

/// Description of the task to run in a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    /// Unique task id; also names the container and its snapshot
    pub id: String,
    /// Image reference
    pub image: String,
    /// Entrypoint override, run through `sh -c` when non-empty
    pub command: Option<String>,
    /// Memory limit in bytes (0 = unconstrained)
    pub memory_limit_bytes: u64,
    /// Relative CPU weight (0 = daemon default)
    pub cpu_shares: u64,
    /// Namespace the task expects; must match the manager's when set
    pub namespace: Option<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn with_cpu_shares(mut self, shares: u64) -> Self {
        self.cpu_shares = shares;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Command override, if one is set and non-blank
    pub fn effective_command(&self) -> Option<&str> {
        self.command.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Reject specs that cannot be created; runs before any daemon call
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidSpec("task id must not be empty".to_string()));
        }
        if self.image.trim().is_empty() {
            return Err(CoreError::InvalidSpec(format!(
                "image must be specified for task {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Build the ordered process-spec options for a task.
///
/// The image config always comes first: applying it resets args, env and
/// working directory, so anything placed before it would be lost.
pub fn build_spec(task: &TaskSpec, image: &Image) -> Vec<SpecOpt> {
    let mut opts = vec![SpecOpt::ImageConfig(image.config.clone())];

    if let Some(command) = task.effective_command() {
        tracing::info!(command, "overriding image entrypoint");
        opts.push(SpecOpt::ProcessArgs(vec![
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]));
    }

    opts.push(SpecOpt::MemoryLimit(task.memory_limit_bytes));
    opts.push(SpecOpt::CpuShares(task.cpu_shares));
    opts
}

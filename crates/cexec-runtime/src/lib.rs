//! Runtime daemon client trait and implementations for cexec
//!
//! The lifecycle manager is written purely against [`RuntimeClient`]; the
//! Docker Engine adapter is the implementation used in production.

mod docker;
mod error;
mod types;

pub use docker::DockerRuntime;
pub use error::*;
pub use nix::sys::signal::Signal;
pub use types::*;

use async_trait::async_trait;

/// Contract of the container runtime daemon.
///
/// Every call is scoped to a namespace; a container created in one namespace
/// is reported as not found in any other.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Pull and unpack an image
    async fn pull_image(&self, namespace: &str, reference: &str) -> Result<Image>;

    /// Create a container from a process spec, backed by a new writable snapshot
    async fn new_container(
        &self,
        namespace: &str,
        id: &str,
        snapshot_id: &str,
        image: &Image,
        spec: &[SpecOpt],
    ) -> Result<ContainerHandle>;

    /// Look up an existing container
    async fn load_container(&self, namespace: &str, id: &str) -> Result<ContainerHandle>;

    /// Create the task (primary process) of a container without starting it
    async fn new_task(
        &self,
        namespace: &str,
        container: &ContainerHandle,
        io: IoConfig,
    ) -> Result<TaskHandle>;

    /// Look up the task of a container
    async fn load_task(&self, namespace: &str, container: &ContainerHandle) -> Result<TaskHandle>;

    /// Start a created task
    async fn start_task(&self, namespace: &str, task: &TaskHandle) -> Result<()>;

    /// Current status, always fetched from the daemon
    async fn task_status(&self, namespace: &str, task: &TaskHandle) -> Result<TaskStatus>;

    /// Register interest in the task's exit
    async fn wait_task(&self, namespace: &str, task: &TaskHandle) -> Result<ExitWaiter>;

    /// Deliver a signal to the task
    async fn kill_task(&self, namespace: &str, task: &TaskHandle, signal: Signal) -> Result<()>;

    /// Delete the task record of a stopped task
    async fn delete_task(&self, namespace: &str, task: &TaskHandle) -> Result<ExitStatus>;

    /// Delete a container, optionally removing its snapshot
    async fn delete_container(
        &self,
        namespace: &str,
        container: &ContainerHandle,
        cleanup_snapshot: bool,
    ) -> Result<()>;

    /// Remove a snapshot that is not attached to any container
    async fn delete_snapshot(&self, namespace: &str, snapshot_id: &str) -> Result<()>;

    /// Check that the daemon is reachable
    async fn ping(&self) -> Result<()>;
}

/// Connect to the runtime daemon described by the configuration
pub async fn create_client(
    config: &cexec_config::RuntimeConfig,
) -> Result<Box<dyn RuntimeClient>> {
    let client = DockerRuntime::new(&config.socket).await?;
    Ok(Box::new(client))
}

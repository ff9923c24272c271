//! One-shot supervised run: create, run, wait, then tear down

use crate::{Result, TaskSpec};
use cexec_runtime::ContainerHandle;
use std::time::Duration;

use super::LifecycleManager;

/// Result of a supervised run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub container_id: ContainerHandle,
    /// Exit code of the task; `None` when it was killed on timeout
    pub exit_code: Option<u32>,
    pub timed_out: bool,
}

impl LifecycleManager {
    /// Run a task to completion and clean up after it.
    ///
    /// Once the container exists, stop and remove are always attempted, even
    /// when run or wait failed. With a timeout the task is stopped (killed)
    /// when it does not exit in time.
    pub async fn run_to_completion(
        &self,
        task: &TaskSpec,
        timeout: Option<Duration>,
    ) -> Result<TaskOutcome> {
        let container = self.create(task).await?;

        let result = self.run_and_wait(&container, timeout).await;
        let teardown = self.teardown(&container).await;

        match (result, teardown) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                tracing::warn!(id = container.id(), "teardown failed as well: {}", cleanup);
                Err(e)
            }
        }
    }

    async fn run_and_wait(
        &self,
        container: &ContainerHandle,
        timeout: Option<Duration>,
    ) -> Result<TaskOutcome> {
        self.run(container).await?;

        let Some(limit) = timeout else {
            let code = self.wait(container).await?;
            return Ok(TaskOutcome {
                container_id: container.clone(),
                exit_code: Some(code),
                timed_out: false,
            });
        };

        tokio::select! {
            result = self.wait(container) => Ok(TaskOutcome {
                container_id: container.clone(),
                exit_code: Some(result?),
                timed_out: false,
            }),
            _ = tokio::time::sleep(limit) => {
                tracing::warn!(id = container.id(), timeout_secs = limit.as_secs(), "task timed out");
                Ok(TaskOutcome {
                    container_id: container.clone(),
                    exit_code: None,
                    timed_out: true,
                })
            }
        }
    }

    async fn teardown(&self, container: &ContainerHandle) -> Result<()> {
        self.stop(container).await?;

        // A post-stop hook may already have removed the container.
        match self.client.load_container(&self.namespace, container.id()).await {
            Ok(_) => self.remove(container).await,
            Err(e) if e.is_not_found() => {
                tracing::debug!(id = container.id(), "container already removed");
                Ok(())
            }
            Err(e) => Err(crate::CoreError::daemon("load container", container.id(), e)),
        }
    }
}

//! Stop and remove for LifecycleManager

use crate::{CoreError, HookStage, LifecycleEvent, Result};
use cexec_runtime::{ContainerHandle, Signal, TaskStatus};
use tracing::Instrument;

use super::LifecycleManager;

impl LifecycleManager {
    /// Stop the container's task and delete the task record.
    ///
    /// Idempotent: a container or task that no longer exists counts as
    /// stopped. A running task is killed with SIGKILL first.
    pub async fn stop(&self, container: &ContainerHandle) -> Result<()> {
        let span = self.op_span("stop", container.id());
        self.stop_container(container).instrument(span).await
    }

    async fn stop_container(&self, container: &ContainerHandle) -> Result<()> {
        let container = match self
            .client
            .load_container(&self.namespace, container.id())
            .await
        {
            Ok(container) => container,
            Err(e) if e.is_not_found() => {
                tracing::warn!("container not found, treating as stopped: {}", e);
                return Ok(());
            }
            Err(e) => return Err(CoreError::daemon("load container", container.id(), e)),
        };

        self.hooks.run(HookStage::PreStop, self, &container).await?;

        self.stop_task(&container).await?;

        if let Err(e) = self.hooks.run(HookStage::PostStop, self, &container).await {
            tracing::warn!("post-stop hook failed: {}", e);
        }
        Ok(())
    }

    async fn stop_task(&self, container: &ContainerHandle) -> Result<()> {
        let id = container.id();

        let task = match self.client.load_task(&self.namespace, container).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                tracing::warn!("task not found, treating as stopped: {}", e);
                return Ok(());
            }
            Err(e) => return Err(CoreError::daemon("load task", id, e)),
        };

        let status = self
            .client
            .task_status(&self.namespace, &task)
            .await
            .map_err(|e| CoreError::daemon("task status", id, e))?;

        if status != TaskStatus::Stopped {
            tracing::info!(%status, "task is not stopped, killing it first");

            // Register for the exit before signalling, or an exit reaped in
            // between would never be delivered.
            let waiter = self
                .client
                .wait_task(&self.namespace, &task)
                .await
                .map_err(|e| CoreError::daemon("wait task", id, e))?;

            self.client
                .kill_task(&self.namespace, &task, Signal::SIGKILL)
                .await
                .map_err(|e| {
                    tracing::error!("kill task failed: {}", e);
                    CoreError::SignalDeliveryFailed {
                        id: id.to_string(),
                        source: e,
                    }
                })?;

            let code = waiter
                .wait()
                .await
                .and_then(|status| status.result())
                .map_err(|e| CoreError::daemon("wait task", id, e))?;

            tracing::info!(code, "task killed");
            self.emit(LifecycleEvent::Killed {
                id: id.to_string(),
                code,
            });
        }

        let exit = self
            .client
            .delete_task(&self.namespace, &task)
            .await
            .map_err(|e| {
                tracing::error!("task delete failed: {}", e);
                CoreError::daemon("delete task", id, e)
            })?;

        tracing::info!(code = exit.code, "task deleted");
        self.emit(LifecycleEvent::TaskDeleted {
            id: id.to_string(),
            code: exit.code,
        });
        Ok(())
    }

    /// Delete the container together with its snapshot.
    ///
    /// Unlike `stop`, a missing container is an error. The task must already
    /// have been deleted by `stop`.
    pub async fn remove(&self, container: &ContainerHandle) -> Result<()> {
        let span = self.op_span("remove", container.id());
        self.remove_container(container).instrument(span).await
    }

    async fn remove_container(&self, container: &ContainerHandle) -> Result<()> {
        let container = self.load_container("remove", container.id()).await?;

        self.hooks.run(HookStage::PreRemove, self, &container).await?;

        self.client
            .delete_container(&self.namespace, &container, true)
            .await
            .map_err(|e| {
                tracing::error!("delete container failed: {}", e);
                CoreError::daemon("delete container", container.id(), e)
            })?;

        tracing::info!("container deleted");
        self.emit(LifecycleEvent::Removed {
            id: container.id().to_string(),
        });

        if let Err(e) = self.hooks.run(HookStage::PostRemove, self, &container).await {
            tracing::warn!("post-remove hook failed: {}", e);
        }
        Ok(())
    }
}

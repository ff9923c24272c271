//! Lifecycle manager - drives a container through create, run, wait, stop and remove
//!
//! The manager keeps no per-container state. Every operation re-loads the
//! container (and task) from the runtime daemon, which stays the single source
//! of truth even when the process was reaped behind our back.

mod stop;
mod supervise;

pub use supervise::TaskOutcome;

use crate::{build_spec, CoreError, HookManager, HookStage, LifecycleEvent, Result, TaskSpec};
use cexec_config::ExecutorConfig;
use cexec_runtime::{ContainerHandle, IoConfig, RuntimeClient, TaskHandle};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, Span};

/// Drives containers of one namespace through their lifecycle
pub struct LifecycleManager {
    /// Shared runtime daemon client
    client: Arc<dyn RuntimeClient>,
    /// Namespace every call is scoped to
    namespace: String,
    /// Enabled extension points
    hooks: HookManager,
    /// Where the task's standard streams go
    io: IoConfig,
    /// Optional sink for lifecycle events
    events: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    /// Parent span of every operation
    span: Span,
}

impl LifecycleManager {
    /// Create a manager without hooks, logging under a `lifecycle` span
    pub fn new(client: Arc<dyn RuntimeClient>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let span = tracing::info_span!("lifecycle", namespace = %namespace);
        Self {
            client,
            namespace,
            hooks: HookManager::default(),
            io: IoConfig::Stdio,
            events: None,
            span,
        }
    }

    /// Create a manager using the namespace and hooks from the executor configuration
    pub fn from_config(client: Arc<dyn RuntimeClient>, config: &ExecutorConfig) -> Self {
        Self::new(client, config.runtime.namespace.clone())
            .with_hooks(HookManager::with_builtin_hooks(config.executor.hooks.clone()))
    }

    pub fn with_hooks(mut self, hooks: HookManager) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_io(mut self, io: IoConfig) -> Self {
        self.io = io;
        self
    }

    /// Report lifecycle events on the given channel
    pub fn with_events(mut self, events: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Log every operation under the given span instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(tx) = &self.events {
            // The receiver going away must not fail the lifecycle.
            let _ = tx.send(event);
        }
    }

    fn op_span(&self, op: &'static str, id: &str) -> Span {
        tracing::info_span!(parent: &self.span, "op", op, id)
    }

    /// Load a container that is required to exist
    async fn load_container(&self, op: &'static str, id: &str) -> Result<ContainerHandle> {
        self.client
            .load_container(&self.namespace, id)
            .await
            .map_err(|e| {
                tracing::error!("get container from id failed: {}", e);
                CoreError::lookup(op, id, e)
            })
    }

    /// Load the task of a container that is required to have one
    async fn load_task(&self, op: &'static str, container: &ContainerHandle) -> Result<TaskHandle> {
        self.client
            .load_task(&self.namespace, container)
            .await
            .map_err(|e| {
                tracing::error!("get task from id failed: {}", e);
                CoreError::lookup(op, container.id(), e)
            })
    }

    /// Pull the image and create a container for the task.
    ///
    /// Returns the id the daemon assigned, which every later call must use.
    pub async fn create(&self, task: &TaskSpec) -> Result<ContainerHandle> {
        let span = self.op_span("create", &task.id);
        self.create_container(task).instrument(span).await
    }

    async fn create_container(&self, task: &TaskSpec) -> Result<ContainerHandle> {
        task.validate()?;
        if let Some(ns) = task.namespace.as_deref() {
            if ns != self.namespace {
                return Err(CoreError::InvalidSpec(format!(
                    "task {} targets namespace {} but this executor manages {}",
                    task.id, ns, self.namespace
                )));
            }
        }

        self.hooks.run_pre_create(self, task).await?;

        let image = self
            .client
            .pull_image(&self.namespace, &task.image)
            .await
            .map_err(|e| {
                tracing::error!(image = %task.image, "pull image failed: {}", e);
                CoreError::PullFailed {
                    image: task.image.clone(),
                    source: e,
                }
            })?;

        let opts = build_spec(task, &image);

        let container = match self
            .client
            .new_container(&self.namespace, &task.id, &task.id, &image, &opts)
            .await
        {
            Ok(container) => container,
            Err(e) => {
                tracing::error!("create container failed: {}", e);
                // On a name clash the snapshot belongs to the existing container.
                if !e.is_already_exists() {
                    self.cleanup_snapshot(&task.id).await;
                }
                return Err(CoreError::daemon("create container", &task.id, e));
            }
        };

        tracing::info!(container = %container, "container created");
        self.emit(LifecycleEvent::Created {
            id: container.id().to_string(),
        });

        self.hooks.run(HookStage::PostCreate, self, &container).await?;
        Ok(container)
    }

    /// Best-effort removal of a snapshot left behind by a failed container creation
    async fn cleanup_snapshot(&self, snapshot_id: &str) {
        match self.client.delete_snapshot(&self.namespace, snapshot_id).await {
            Ok(()) => tracing::info!(snapshot_id, "removed snapshot of failed container"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(snapshot_id, "no snapshot left behind")
            }
            Err(e) => tracing::warn!(snapshot_id, "failed to clean up snapshot: {}", e),
        }
    }

    /// Create the container's task, attached to our stdio, and start it
    pub async fn run(&self, container: &ContainerHandle) -> Result<()> {
        let span = self.op_span("run", container.id());
        self.run_task(container).instrument(span).await
    }

    async fn run_task(&self, container: &ContainerHandle) -> Result<()> {
        let container = self.load_container("run", container.id()).await?;

        self.hooks.run(HookStage::PreRun, self, &container).await?;

        let task = self
            .client
            .new_task(&self.namespace, &container, self.io)
            .await
            .map_err(|e| {
                tracing::error!("create task failed: {}", e);
                CoreError::daemon("create task", container.id(), e)
            })?;

        self.client
            .start_task(&self.namespace, &task)
            .await
            .map_err(|e| {
                tracing::error!("start task failed: {}", e);
                CoreError::daemon("start task", container.id(), e)
            })?;

        tracing::info!("task started");
        self.emit(LifecycleEvent::Started {
            id: container.id().to_string(),
        });

        self.hooks.run(HookStage::PostRun, self, &container).await
    }

    /// Block until the container's task exits and return its exit code.
    ///
    /// A non-zero code is returned as data, not as an error.
    pub async fn wait(&self, container: &ContainerHandle) -> Result<u32> {
        let span = self.op_span("wait", container.id());
        self.wait_task(container).instrument(span).await
    }

    async fn wait_task(&self, container: &ContainerHandle) -> Result<u32> {
        let container = self.load_container("wait", container.id()).await?;
        let task = self.load_task("wait", &container).await?;

        let waiter = self
            .client
            .wait_task(&self.namespace, &task)
            .await
            .map_err(|e| CoreError::daemon("wait task", container.id(), e))?;

        let code = waiter
            .wait()
            .await
            .and_then(|status| status.result())
            .map_err(|e| {
                tracing::error!("get task exit status error: {}", e);
                CoreError::daemon("wait task", container.id(), e)
            })?;

        tracing::info!(code, "task exited");
        self.emit(LifecycleEvent::Exited {
            id: container.id().to_string(),
            code,
        });
        Ok(code)
    }

    /// OS process id of the container's task. Not provided by this executor.
    pub async fn pid(&self, _container: &ContainerHandle) -> Result<u32> {
        Err(CoreError::Unsupported("container pid lookup"))
    }

    /// Run an additional command inside a running container. Not provided by this executor.
    pub async fn exec(&self, _container: &ContainerHandle, _cmd: &[String]) -> Result<u32> {
        Err(CoreError::Unsupported("exec in container"))
    }

    /// Addresses bound to an interface of the container. Not provided by this executor.
    pub async fn ips_by_interface(
        &self,
        _container: &ContainerHandle,
        _interface: &str,
    ) -> Result<Vec<IpAddr>> {
        Err(CoreError::Unsupported("interface address lookup"))
    }
}

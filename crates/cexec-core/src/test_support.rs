//! Test support utilities for cexec-core
//!
//! Provides FakeRuntime, an in-memory runtime daemon for unit testing the
//! LifecycleManager without a real container runtime. Containers, tasks and
//! snapshots are tracked per namespace and task exits are delivered through
//! real `ExitWaiter`s, so ordering bugs show up as hangs.

use async_trait::async_trait;
use cexec_runtime::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Records which methods were called on the fake
#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    PullImage { image: String },
    NewContainer {
        id: String,
        snapshot_id: String,
        spec: Vec<SpecOpt>,
    },
    LoadContainer { id: String },
    NewTask { id: String },
    LoadTask { id: String },
    StartTask { id: String },
    TaskStatus { id: String },
    WaitTask { id: String },
    KillTask { id: String, signal: Signal },
    DeleteTask { id: String },
    DeleteContainer { id: String, cleanup_snapshot: bool },
    DeleteSnapshot { snapshot_id: String },
    Ping,
}

struct FakeTask {
    status: TaskStatus,
    exit_code: u32,
    waiters: Vec<ExitNotifier>,
}

impl FakeTask {
    fn exit(&mut self, code: u32) {
        self.status = TaskStatus::Stopped;
        self.exit_code = code;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(ExitStatus::new(code)));
        }
    }
}

struct FakeContainer {
    namespace: String,
    snapshot_id: String,
    task: Option<FakeTask>,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    snapshots: HashSet<String>,
    /// Waits that will never be answered
    parked: Vec<ExitNotifier>,
}

/// Configurable in-memory runtime daemon
pub struct FakeRuntime {
    pub calls: Arc<Mutex<Vec<FakeCall>>>,
    state: Mutex<FakeState>,
    /// Config reported for every pulled image
    pub image_config: Mutex<ImageConfig>,
    /// Id returned by new_container instead of the requested one
    pub assigned_id: Mutex<Option<String>>,
    /// Exit tasks with this code as soon as they start
    pub exit_on_start: Mutex<Option<u32>>,
    /// Exit code of a task killed by a signal
    pub kill_exit_code: Mutex<u32>,
    /// Drop waits registered after the task already stopped, like a daemon
    /// that only publishes exit events to current subscribers
    pub lose_late_waits: Mutex<bool>,
    /// Errors returned by the corresponding calls (if Some)
    pub pull_error: Mutex<Option<RuntimeError>>,
    pub new_container_error: Mutex<Option<RuntimeError>>,
    pub start_error: Mutex<Option<RuntimeError>>,
    pub status_error: Mutex<Option<RuntimeError>>,
    pub kill_error: Mutex<Option<RuntimeError>>,
    pub delete_task_error: Mutex<Option<RuntimeError>>,
    pub delete_container_error: Mutex<Option<RuntimeError>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Create an empty fake where every call succeeds
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(FakeState::default()),
            image_config: Mutex::new(ImageConfig {
                entrypoint: Vec::new(),
                cmd: vec!["/bin/sh".to_string()],
                env: vec!["PATH=/usr/local/bin:/usr/bin:/bin".to_string()],
                working_dir: None,
            }),
            assigned_id: Mutex::new(None),
            exit_on_start: Mutex::new(None),
            kill_exit_code: Mutex::new(137),
            lose_late_waits: Mutex::new(false),
            pull_error: Mutex::new(None),
            new_container_error: Mutex::new(None),
            start_error: Mutex::new(None),
            status_error: Mutex::new(None),
            kill_error: Mutex::new(None),
            delete_task_error: Mutex::new(None),
            delete_container_error: Mutex::new(None),
        }
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &FakeCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    pub fn has_container(&self, namespace: &str, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .is_some_and(|c| c.namespace == namespace)
    }

    pub fn has_snapshot(&self, snapshot_id: &str) -> bool {
        self.state.lock().unwrap().snapshots.contains(snapshot_id)
    }

    /// Status of a container's task, `None` when it has no task
    pub fn task_status_of(&self, id: &str) -> Option<TaskStatus> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .and_then(|c| c.task.as_ref())
            .map(|t| t.status)
    }

    /// Make a task exit on its own, as if its process returned
    pub fn exit_task(&self, id: &str, code: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.containers.get_mut(id).and_then(|c| c.task.as_mut()) {
            task.exit(code);
        }
    }

    fn injected(&self, slot: &Mutex<Option<RuntimeError>>) -> Result<()> {
        match &*slot.lock().unwrap() {
            Some(e) => Err(clone_runtime_error(e)),
            None => Ok(()),
        }
    }
}

/// Clone a RuntimeError (thiserror types don't implement Clone)
pub fn clone_runtime_error(e: &RuntimeError) -> RuntimeError {
    match e {
        RuntimeError::ConnectionError(s) => RuntimeError::ConnectionError(s.clone()),
        RuntimeError::NotFound(s) => RuntimeError::NotFound(s.clone()),
        RuntimeError::AlreadyExists(s) => RuntimeError::AlreadyExists(s.clone()),
        RuntimeError::PullError(s) => RuntimeError::PullError(s.clone()),
        RuntimeError::DaemonError(s) => RuntimeError::DaemonError(s.clone()),
        RuntimeError::Unsupported(s) => RuntimeError::Unsupported(s.clone()),
        RuntimeError::IoError(_) => RuntimeError::DaemonError("IO error (cloned)".into()),
    }
}

fn not_found(what: &str, id: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("{} {}: not found", what, id))
}

fn container_in<'a>(
    state: &'a mut FakeState,
    namespace: &str,
    id: &str,
) -> Result<&'a mut FakeContainer> {
    state
        .containers
        .get_mut(id)
        .filter(|c| c.namespace == namespace)
        .ok_or_else(|| not_found("container", id))
}

fn task_in<'a>(state: &'a mut FakeState, namespace: &str, id: &str) -> Result<&'a mut FakeTask> {
    container_in(state, namespace, id)?
        .task
        .as_mut()
        .ok_or_else(|| not_found("task", id))
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn pull_image(&self, _namespace: &str, reference: &str) -> Result<Image> {
        self.record(FakeCall::PullImage {
            image: reference.to_string(),
        });
        self.injected(&self.pull_error)?;
        Ok(Image {
            name: reference.to_string(),
            config: self.image_config.lock().unwrap().clone(),
        })
    }

    async fn new_container(
        &self,
        namespace: &str,
        id: &str,
        snapshot_id: &str,
        _image: &Image,
        spec: &[SpecOpt],
    ) -> Result<ContainerHandle> {
        self.record(FakeCall::NewContainer {
            id: id.to_string(),
            snapshot_id: snapshot_id.to_string(),
            spec: spec.to_vec(),
        });
        let assigned = self
            .assigned_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| id.to_string());

        let mut state = self.state.lock().unwrap();
        if state.containers.contains_key(&assigned) {
            return Err(RuntimeError::AlreadyExists(format!(
                "container {}: already exists",
                assigned
            )));
        }

        // The snapshot is prepared before the container record, so a failure
        // after this point leaves it behind.
        state.snapshots.insert(snapshot_id.to_string());
        self.injected(&self.new_container_error)?;

        state.containers.insert(
            assigned.clone(),
            FakeContainer {
                namespace: namespace.to_string(),
                snapshot_id: snapshot_id.to_string(),
                task: None,
            },
        );
        Ok(ContainerHandle::new(assigned))
    }

    async fn load_container(&self, namespace: &str, id: &str) -> Result<ContainerHandle> {
        self.record(FakeCall::LoadContainer { id: id.to_string() });
        let mut state = self.state.lock().unwrap();
        container_in(&mut state, namespace, id)?;
        Ok(ContainerHandle::new(id))
    }

    async fn new_task(
        &self,
        namespace: &str,
        container: &ContainerHandle,
        _io: IoConfig,
    ) -> Result<TaskHandle> {
        self.record(FakeCall::NewTask {
            id: container.id().to_string(),
        });
        let mut state = self.state.lock().unwrap();
        let entry = container_in(&mut state, namespace, container.id())?;
        if entry.task.is_some() {
            return Err(RuntimeError::AlreadyExists(format!(
                "task {}: already exists",
                container
            )));
        }
        entry.task = Some(FakeTask {
            status: TaskStatus::Created,
            exit_code: 0,
            waiters: Vec::new(),
        });
        Ok(TaskHandle::new(container.id()))
    }

    async fn load_task(&self, namespace: &str, container: &ContainerHandle) -> Result<TaskHandle> {
        self.record(FakeCall::LoadTask {
            id: container.id().to_string(),
        });
        let mut state = self.state.lock().unwrap();
        task_in(&mut state, namespace, container.id())?;
        Ok(TaskHandle::new(container.id()))
    }

    async fn start_task(&self, namespace: &str, task: &TaskHandle) -> Result<()> {
        self.record(FakeCall::StartTask {
            id: task.container_id.clone(),
        });
        self.injected(&self.start_error)?;
        let exit_on_start = *self.exit_on_start.lock().unwrap();

        let mut state = self.state.lock().unwrap();
        let entry = task_in(&mut state, namespace, &task.container_id)?;
        if entry.status != TaskStatus::Created {
            return Err(RuntimeError::DaemonError(format!(
                "task {} is {}, not created",
                task.container_id, entry.status
            )));
        }
        entry.status = TaskStatus::Running;
        if let Some(code) = exit_on_start {
            entry.exit(code);
        }
        Ok(())
    }

    async fn task_status(&self, namespace: &str, task: &TaskHandle) -> Result<TaskStatus> {
        self.record(FakeCall::TaskStatus {
            id: task.container_id.clone(),
        });
        self.injected(&self.status_error)?;
        let mut state = self.state.lock().unwrap();
        Ok(task_in(&mut state, namespace, &task.container_id)?.status)
    }

    async fn wait_task(&self, namespace: &str, task: &TaskHandle) -> Result<ExitWaiter> {
        self.record(FakeCall::WaitTask {
            id: task.container_id.clone(),
        });
        let lose_late_waits = *self.lose_late_waits.lock().unwrap();
        let (tx, waiter) = ExitWaiter::channel();

        let mut state = self.state.lock().unwrap();
        let entry = task_in(&mut state, namespace, &task.container_id)?;
        if entry.status != TaskStatus::Stopped {
            entry.waiters.push(tx);
            return Ok(waiter);
        }
        let code = entry.exit_code;
        if lose_late_waits {
            state.parked.push(tx);
        } else {
            let _ = tx.send(Ok(ExitStatus::new(code)));
        }
        Ok(waiter)
    }

    async fn kill_task(&self, namespace: &str, task: &TaskHandle, signal: Signal) -> Result<()> {
        self.record(FakeCall::KillTask {
            id: task.container_id.clone(),
            signal,
        });
        self.injected(&self.kill_error)?;
        let code = *self.kill_exit_code.lock().unwrap();

        let mut state = self.state.lock().unwrap();
        let entry = task_in(&mut state, namespace, &task.container_id)?;
        if entry.status == TaskStatus::Stopped {
            return Err(RuntimeError::NotFound(format!(
                "process {} already finished",
                task.container_id
            )));
        }
        entry.exit(code);
        Ok(())
    }

    async fn delete_task(&self, namespace: &str, task: &TaskHandle) -> Result<ExitStatus> {
        self.record(FakeCall::DeleteTask {
            id: task.container_id.clone(),
        });
        self.injected(&self.delete_task_error)?;

        let mut state = self.state.lock().unwrap();
        let entry = container_in(&mut state, namespace, &task.container_id)?;
        match entry.task.take() {
            Some(t) if t.status == TaskStatus::Stopped => Ok(ExitStatus::new(t.exit_code)),
            Some(t) => {
                let status = t.status;
                entry.task = Some(t);
                Err(RuntimeError::DaemonError(format!(
                    "task {} must be stopped before deletion: {}",
                    task.container_id, status
                )))
            }
            None => Err(not_found("task", &task.container_id)),
        }
    }

    async fn delete_container(
        &self,
        namespace: &str,
        container: &ContainerHandle,
        cleanup_snapshot: bool,
    ) -> Result<()> {
        self.record(FakeCall::DeleteContainer {
            id: container.id().to_string(),
            cleanup_snapshot,
        });
        self.injected(&self.delete_container_error)?;

        let mut state = self.state.lock().unwrap();
        let entry = container_in(&mut state, namespace, container.id())?;
        if entry.task.is_some() {
            return Err(RuntimeError::DaemonError(format!(
                "cannot delete container {} with a live task",
                container
            )));
        }
        let snapshot_id = entry.snapshot_id.clone();
        state.containers.remove(container.id());
        if cleanup_snapshot {
            state.snapshots.remove(&snapshot_id);
        }
        Ok(())
    }

    async fn delete_snapshot(&self, _namespace: &str, snapshot_id: &str) -> Result<()> {
        self.record(FakeCall::DeleteSnapshot {
            snapshot_id: snapshot_id.to_string(),
        });
        if self.state.lock().unwrap().snapshots.remove(snapshot_id) {
            Ok(())
        } else {
            Err(not_found("snapshot", snapshot_id))
        }
    }

    async fn ping(&self) -> Result<()> {
        self.record(FakeCall::Ping);
        Ok(())
    }
}

/// Hook that fails at one stage and records every stage it is run at
pub struct FailingHook {
    pub fail_at: crate::HookStage,
    pub stages: Arc<Mutex<Vec<crate::HookStage>>>,
}

impl FailingHook {
    pub const NAME: &'static str = "failing";

    pub fn new(fail_at: crate::HookStage) -> Self {
        Self {
            fail_at,
            stages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A hook manager with only this hook enabled
    pub fn install(self: &Arc<Self>) -> crate::HookManager {
        let mut hooks = crate::HookManager::new(vec![Self::NAME.to_string()]);
        hooks.register(self.clone());
        hooks
    }

    pub fn ran(&self) -> Vec<crate::HookStage> {
        self.stages.lock().unwrap().clone()
    }

    fn at(&self, stage: crate::HookStage) -> crate::Result<()> {
        self.stages.lock().unwrap().push(stage);
        if stage == self.fail_at {
            return Err(crate::CoreError::InvalidSpec(format!("{} refused", stage)));
        }
        Ok(())
    }
}

#[async_trait]
impl crate::Hook for FailingHook {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn pre_create(
        &self,
        _manager: &crate::LifecycleManager,
        _task: &crate::TaskSpec,
    ) -> crate::Result<()> {
        self.at(crate::HookStage::PreCreate)
    }

    async fn post_create(
        &self,
        _manager: &crate::LifecycleManager,
        _container: &ContainerHandle,
    ) -> crate::Result<()> {
        self.at(crate::HookStage::PostCreate)
    }

    async fn pre_stop(
        &self,
        _manager: &crate::LifecycleManager,
        _container: &ContainerHandle,
    ) -> crate::Result<()> {
        self.at(crate::HookStage::PreStop)
    }

    async fn post_stop(
        &self,
        _manager: &crate::LifecycleManager,
        _container: &ContainerHandle,
    ) -> crate::Result<()> {
        self.at(crate::HookStage::PostStop)
    }

    async fn pre_remove(
        &self,
        _manager: &crate::LifecycleManager,
        _container: &ContainerHandle,
    ) -> crate::Result<()> {
        self.at(crate::HookStage::PreRemove)
    }

    async fn post_remove(
        &self,
        _manager: &crate::LifecycleManager,
        _container: &ContainerHandle,
    ) -> crate::Result<()> {
        self.at(crate::HookStage::PostRemove)
    }
}

//! Extension points around lifecycle transitions
//!
//! Hooks are registered by name and only kept when that name is enabled in
//! the executor configuration. Pre-hooks that fail abort the transition;
//! post-hook failures are reported to the manager, which decides whether the
//! transition as a whole fails.

use crate::{CoreError, LifecycleManager, Result, TaskSpec};
use async_trait::async_trait;
use cexec_runtime::ContainerHandle;
use std::sync::Arc;

/// Point in the lifecycle a hook runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    PreCreate,
    PostCreate,
    PreRun,
    PostRun,
    PreStop,
    PostStop,
    PreRemove,
    PostRemove,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreCreate => write!(f, "pre-create"),
            Self::PostCreate => write!(f, "post-create"),
            Self::PreRun => write!(f, "pre-run"),
            Self::PostRun => write!(f, "post-run"),
            Self::PreStop => write!(f, "pre-stop"),
            Self::PostStop => write!(f, "post-stop"),
            Self::PreRemove => write!(f, "pre-remove"),
            Self::PostRemove => write!(f, "post-remove"),
        }
    }
}

/// An auxiliary action run around container transitions (network wiring,
/// firewall rules, access checks, cleanup)
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name used to enable the hook in configuration
    fn name(&self) -> &str;

    /// Lower priorities run first
    fn priority(&self) -> i32 {
        0
    }

    async fn pre_create(&self, _manager: &LifecycleManager, _task: &TaskSpec) -> Result<()> {
        Ok(())
    }

    async fn post_create(
        &self,
        _manager: &LifecycleManager,
        _container: &ContainerHandle,
    ) -> Result<()> {
        Ok(())
    }

    async fn pre_run(&self, _manager: &LifecycleManager, _container: &ContainerHandle) -> Result<()> {
        Ok(())
    }

    async fn post_run(
        &self,
        _manager: &LifecycleManager,
        _container: &ContainerHandle,
    ) -> Result<()> {
        Ok(())
    }

    async fn pre_stop(
        &self,
        _manager: &LifecycleManager,
        _container: &ContainerHandle,
    ) -> Result<()> {
        Ok(())
    }

    async fn post_stop(
        &self,
        _manager: &LifecycleManager,
        _container: &ContainerHandle,
    ) -> Result<()> {
        Ok(())
    }

    async fn pre_remove(
        &self,
        _manager: &LifecycleManager,
        _container: &ContainerHandle,
    ) -> Result<()> {
        Ok(())
    }

    async fn post_remove(
        &self,
        _manager: &LifecycleManager,
        _container: &ContainerHandle,
    ) -> Result<()> {
        Ok(())
    }
}

/// Ordered set of enabled hooks
#[derive(Default, Clone)]
pub struct HookManager {
    enabled: Vec<String>,
    hooks: Vec<Arc<dyn Hook>>,
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("enabled", &self.enabled)
            .field("registered", &self.names())
            .finish()
    }
}

impl HookManager {
    /// Create a manager that accepts hooks with the given names
    pub fn new(enabled: Vec<String>) -> Self {
        Self {
            enabled,
            hooks: Vec::new(),
        }
    }

    /// Create a manager with every built-in hook registered
    pub fn with_builtin_hooks(enabled: Vec<String>) -> Self {
        let mut manager = Self::new(enabled);
        manager.register(Arc::new(RemoveContainerHook));
        manager
    }

    /// Register a hook; it is dropped unless its name is enabled
    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        if !self.enabled.iter().any(|name| name == hook.name()) {
            tracing::debug!(hook = hook.name(), "hook not enabled, skipping");
            return;
        }
        tracing::info!(hook = hook.name(), "registering hook");
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    /// Names of registered hooks in execution order
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) async fn run_pre_create(
        &self,
        manager: &LifecycleManager,
        task: &TaskSpec,
    ) -> Result<()> {
        for hook in &self.hooks {
            tracing::debug!(hook = hook.name(), stage = %HookStage::PreCreate, "running hook");
            hook.pre_create(manager, task)
                .await
                .map_err(|e| hook_error(hook.as_ref(), HookStage::PreCreate, e))?;
        }
        Ok(())
    }

    /// Run every hook for a stage, stopping at the first failure
    pub(crate) async fn run(
        &self,
        stage: HookStage,
        manager: &LifecycleManager,
        container: &ContainerHandle,
    ) -> Result<()> {
        for hook in &self.hooks {
            tracing::debug!(hook = hook.name(), %stage, "running hook");
            let result = match stage {
                HookStage::PreCreate => continue,
                HookStage::PostCreate => hook.post_create(manager, container).await,
                HookStage::PreRun => hook.pre_run(manager, container).await,
                HookStage::PostRun => hook.post_run(manager, container).await,
                HookStage::PreStop => hook.pre_stop(manager, container).await,
                HookStage::PostStop => hook.post_stop(manager, container).await,
                HookStage::PreRemove => hook.pre_remove(manager, container).await,
                HookStage::PostRemove => hook.post_remove(manager, container).await,
            };
            result.map_err(|e| hook_error(hook.as_ref(), stage, e))?;
        }
        Ok(())
    }
}

fn hook_error(hook: &dyn Hook, stage: HookStage, err: CoreError) -> CoreError {
    match err {
        err @ CoreError::Hook { .. } => err,
        other => CoreError::Hook {
            hook: hook.name().to_string(),
            stage,
            message: other.to_string(),
        },
    }
}

/// Removes the container once its task has been stopped and deleted
pub struct RemoveContainerHook;

impl RemoveContainerHook {
    pub const NAME: &'static str = "remove_container";
}

#[async_trait]
impl Hook for RemoveContainerHook {
    fn name(&self) -> &str {
        Self::NAME
    }

    // Runs after every other post-stop hook.
    fn priority(&self) -> i32 {
        i32::MAX
    }

    async fn post_stop(&self, manager: &LifecycleManager, container: &ContainerHandle) -> Result<()> {
        manager.remove(container).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRuntime;
    use std::sync::Mutex;

    struct RecordingHook {
        name: &'static str,
        priority: i32,
        fail_at: Option<HookStage>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingHook {
        fn new(name: &'static str, priority: i32, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                priority,
                fail_at: None,
                log,
            }
        }

        fn record(&self, stage: HookStage) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, stage));
            if self.fail_at == Some(stage) {
                return Err(CoreError::InvalidSpec(format!("{} refused", self.name)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Hook for RecordingHook {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn pre_create(&self, _manager: &LifecycleManager, _task: &TaskSpec) -> Result<()> {
            self.record(HookStage::PreCreate)
        }

        async fn post_stop(
            &self,
            _manager: &LifecycleManager,
            _container: &ContainerHandle,
        ) -> Result<()> {
            self.record(HookStage::PostStop)
        }
    }

    fn manager() -> LifecycleManager {
        LifecycleManager::new(Arc::new(FakeRuntime::new()), "default")
    }

    #[test]
    fn test_register_skips_disabled_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookManager::new(vec!["acl".to_string()]);
        hooks.register(Arc::new(RecordingHook::new("acl", 0, log.clone())));
        hooks.register(Arc::new(RecordingHook::new("iptables", 0, log)));

        assert_eq!(hooks.names(), vec!["acl"]);
    }

    #[test]
    fn test_builtin_hooks_need_enabling() {
        assert!(HookManager::with_builtin_hooks(Vec::new()).is_empty());
        let hooks = HookManager::with_builtin_hooks(vec![RemoveContainerHook::NAME.to_string()]);
        assert_eq!(hooks.names(), vec![RemoveContainerHook::NAME]);
    }

    #[tokio::test]
    async fn test_hooks_run_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookManager::new(vec!["netns".to_string(), "acl".to_string()]);
        hooks.register(Arc::new(RecordingHook::new("netns", 10, log.clone())));
        hooks.register(Arc::new(RecordingHook::new("acl", -5, log.clone())));

        let mgr = manager();
        let container = ContainerHandle::new("t1");
        hooks
            .run(HookStage::PostStop, &mgr, &container)
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["acl:post-stop".to_string(), "netns:post-stop".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failing_hook_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = HookManager::new(vec!["acl".to_string(), "netns".to_string()]);
        let mut acl = RecordingHook::new("acl", 0, log.clone());
        acl.fail_at = Some(HookStage::PreCreate);
        hooks.register(Arc::new(acl));
        hooks.register(Arc::new(RecordingHook::new("netns", 1, log.clone())));

        let mgr = manager();
        let err = hooks
            .run_pre_create(&mgr, &TaskSpec::new("t1", "alpine"))
            .await
            .unwrap_err();

        match err {
            CoreError::Hook { hook, stage, .. } => {
                assert_eq!(hook, "acl");
                assert_eq!(stage, HookStage::PreCreate);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["acl:pre-create".to_string()]);
    }
}

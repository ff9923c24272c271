//! Lifecycle scenarios against the in-memory runtime.
//!
//! Each test drives the public LifecycleManager API end to end the way the
//! executor binary does, and checks the exact daemon traffic it produced.

use cexec_core::test_support::{FakeCall, FakeRuntime};
use cexec_core::{CoreError, LifecycleEvent, LifecycleManager, TaskSpec};
use cexec_runtime::{ImageConfig, IoConfig, Signal, SpecOpt, TaskStatus};
use std::sync::Arc;
use std::time::Duration;

fn manager(fake: &Arc<FakeRuntime>) -> LifecycleManager {
    LifecycleManager::new(fake.clone(), "default").with_io(IoConfig::Null)
}

fn count(fake: &FakeRuntime, pred: impl Fn(&FakeCall) -> bool) -> usize {
    fake.get_calls().iter().filter(|c| pred(c)).count()
}

#[tokio::test]
async fn test_exit_code_round_trip() {
    let fake = Arc::new(FakeRuntime::new());
    *fake.exit_on_start.lock().unwrap() = Some(42);
    let mgr = manager(&fake);

    let task = TaskSpec::new("round-trip", "alpine:3.19").with_command("exit 42");
    let container = mgr.create(&task).await.unwrap();
    mgr.run(&container).await.unwrap();

    assert_eq!(mgr.wait(&container).await.unwrap(), 42);
}

/// t1: a redis task is stopped while still running
#[tokio::test]
async fn test_stop_running_redis_task() {
    let fake = Arc::new(FakeRuntime::new());
    *fake.image_config.lock().unwrap() = ImageConfig {
        entrypoint: vec!["docker-entrypoint.sh".to_string()],
        cmd: vec!["redis-server".to_string()],
        env: Vec::new(),
        working_dir: Some("/data".to_string()),
    };
    let mgr = manager(&fake);

    let task = TaskSpec::new("t1", "library/redis:alpine");
    let container = mgr.create(&task).await.unwrap();
    mgr.run(&container).await.unwrap();
    assert_eq!(fake.task_status_of("t1"), Some(TaskStatus::Running));

    tokio::time::timeout(Duration::from_secs(1), mgr.stop(&container))
        .await
        .expect("stop did not return")
        .unwrap();

    assert!(fake.was_called(&FakeCall::KillTask {
        id: "t1".to_string(),
        signal: Signal::SIGKILL
    }));
    assert_eq!(
        count(&fake, |c| matches!(c, FakeCall::DeleteTask { .. })),
        1
    );

    mgr.remove(&container).await.unwrap();
    assert!(!fake.has_container("default", "t1"));
    assert!(!fake.has_snapshot("t1"));

    // The image's own entrypoint was kept
    let spec = fake
        .get_calls()
        .into_iter()
        .find_map(|c| match c {
            FakeCall::NewContainer { spec, .. } => Some(spec),
            _ => None,
        })
        .unwrap();
    assert!(!spec.iter().any(|o| matches!(o, SpecOpt::ProcessArgs(_))));
}

/// t2: a task without an image is rejected before reaching the daemon
#[tokio::test]
async fn test_empty_image_is_rejected() {
    let fake = Arc::new(FakeRuntime::new());
    let mgr = manager(&fake);

    let task = TaskSpec::new("t2", "").with_command("echo hi");
    let err = mgr.create(&task).await.unwrap_err();

    assert!(matches!(err, CoreError::InvalidSpec(_)));
    assert!(fake.get_calls().is_empty());
}

/// t3: the task already exited on its own before stop
#[tokio::test]
async fn test_stop_after_natural_exit() {
    let fake = Arc::new(FakeRuntime::new());
    let mgr = manager(&fake);

    let container = mgr
        .create(&TaskSpec::new("t3", "alpine").with_command("true"))
        .await
        .unwrap();
    mgr.run(&container).await.unwrap();
    fake.exit_task("t3", 0);

    mgr.stop(&container).await.unwrap();

    assert_eq!(count(&fake, |c| matches!(c, FakeCall::KillTask { .. })), 0);
    assert!(fake.was_called(&FakeCall::DeleteTask {
        id: "t3".to_string()
    }));
}

#[tokio::test]
async fn test_full_lifecycle_event_stream() {
    let fake = Arc::new(FakeRuntime::new());
    *fake.exit_on_start.lock().unwrap() = Some(1);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mgr = manager(&fake).with_events(tx);

    let container = mgr.create(&TaskSpec::new("t1", "alpine")).await.unwrap();
    mgr.run(&container).await.unwrap();
    let code = mgr.wait(&container).await.unwrap();
    mgr.stop(&container).await.unwrap();
    mgr.remove(&container).await.unwrap();
    drop(mgr);

    assert_eq!(code, 1);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let id = || "t1".to_string();
    assert_eq!(
        events,
        vec![
            LifecycleEvent::Created { id: id() },
            LifecycleEvent::Started { id: id() },
            LifecycleEvent::Exited { id: id(), code: 1 },
            LifecycleEvent::TaskDeleted { id: id(), code: 1 },
            LifecycleEvent::Removed { id: id() },
        ]
    );
}

#[tokio::test]
async fn test_stop_is_idempotent_across_managers() {
    let fake = Arc::new(FakeRuntime::new());
    let mgr = manager(&fake);
    let container = mgr.create(&TaskSpec::new("t1", "alpine")).await.unwrap();
    mgr.run(&container).await.unwrap();

    // A fresh manager holds no state and still sees the container
    let other = manager(&fake);
    other.stop(&container).await.unwrap();
    mgr.stop(&container).await.unwrap();
    other.remove(&container).await.unwrap();
    mgr.stop(&container).await.unwrap();

    assert!(mgr.remove(&container).await.unwrap_err().is_not_found());
}

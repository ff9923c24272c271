//! End-to-end tests for the Docker runtime adapter.
//!
//! Requires a reachable Docker daemon (`CEXEC_TEST_SOCKET`, default
//! `/var/run/docker.sock`). Tests are `#[ignore]` and run explicitly.

use cexec_runtime::{
    ContainerHandle, DockerRuntime, IoConfig, RuntimeClient, Signal, SpecOpt, TaskStatus,
};
use std::time::Duration;

const NAMESPACE: &str = "cexec-e2e";
const IMAGE: &str = "alpine:3.19";

async fn get_test_runtime() -> Option<DockerRuntime> {
    let socket =
        std::env::var("CEXEC_TEST_SOCKET").unwrap_or_else(|_| "/var/run/docker.sock".to_string());
    match DockerRuntime::new(&socket).await {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            eprintln!("Skipping test: runtime unavailable: {}", e);
            None
        }
    }
}

fn unique_id(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", prefix, nanos)
}

async fn cleanup(runtime: &DockerRuntime, handle: &ContainerHandle) {
    if let Ok(task) = runtime.load_task(NAMESPACE, handle).await {
        let _ = runtime.kill_task(NAMESPACE, &task, Signal::SIGKILL).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let _ = runtime.delete_container(NAMESPACE, handle, true).await;
}

#[tokio::test]
#[ignore]
async fn test_exit_code_round_trip() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let id = unique_id("exit");

    let image = runtime.pull_image(NAMESPACE, IMAGE).await.unwrap();
    let spec = vec![
        SpecOpt::ImageConfig(image.config.clone()),
        SpecOpt::ProcessArgs(vec!["sh".into(), "-c".into(), "exit 3".into()]),
        SpecOpt::MemoryLimit(0),
        SpecOpt::CpuShares(0),
    ];
    let handle = runtime
        .new_container(NAMESPACE, &id, &id, &image, &spec)
        .await
        .unwrap();

    let task = runtime
        .new_task(NAMESPACE, &handle, IoConfig::Null)
        .await
        .unwrap();
    runtime.start_task(NAMESPACE, &task).await.unwrap();

    let waiter = runtime.wait_task(NAMESPACE, &task).await.unwrap();
    let status = waiter.wait().await.unwrap();
    assert_eq!(status.code, 3);

    let status = runtime.task_status(NAMESPACE, &task).await.unwrap();
    assert_eq!(status, TaskStatus::Stopped);

    let deleted = runtime.delete_task(NAMESPACE, &task).await.unwrap();
    assert_eq!(deleted.code, 3);

    runtime
        .delete_container(NAMESPACE, &handle, true)
        .await
        .unwrap();
    assert!(runtime
        .load_container(NAMESPACE, &id)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
#[ignore]
async fn test_other_namespace_is_not_found() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let id = unique_id("ns");

    let image = runtime.pull_image(NAMESPACE, IMAGE).await.unwrap();
    let spec = vec![SpecOpt::ImageConfig(image.config.clone())];
    let handle = runtime
        .new_container(NAMESPACE, &id, &id, &image, &spec)
        .await
        .unwrap();

    let err = runtime
        .load_container("somewhere-else", &id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    // Never started, so there is no task yet
    assert!(runtime
        .load_task(NAMESPACE, &handle)
        .await
        .unwrap_err()
        .is_not_found());

    cleanup(&runtime, &handle).await;
}

#[tokio::test]
#[ignore]
async fn test_kill_running_task() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let id = unique_id("kill");

    let image = runtime.pull_image(NAMESPACE, IMAGE).await.unwrap();
    let spec = vec![
        SpecOpt::ImageConfig(image.config.clone()),
        SpecOpt::ProcessArgs(vec!["sh".into(), "-c".into(), "sleep 300".into()]),
    ];
    let handle = runtime
        .new_container(NAMESPACE, &id, &id, &image, &spec)
        .await
        .unwrap();
    let task = runtime
        .new_task(NAMESPACE, &handle, IoConfig::Null)
        .await
        .unwrap();
    runtime.start_task(NAMESPACE, &task).await.unwrap();
    assert_eq!(
        runtime.task_status(NAMESPACE, &task).await.unwrap(),
        TaskStatus::Running
    );

    let waiter = runtime.wait_task(NAMESPACE, &task).await.unwrap();
    runtime
        .kill_task(NAMESPACE, &task, Signal::SIGKILL)
        .await
        .unwrap();
    let status = tokio::time::timeout(Duration::from_secs(30), waiter.wait())
        .await
        .expect("task did not exit after SIGKILL")
        .unwrap();
    assert_eq!(status.code, 137);

    runtime.delete_task(NAMESPACE, &task).await.unwrap();
    cleanup(&runtime, &handle).await;
}

#[tokio::test]
#[ignore]
async fn test_task_can_run_again_after_delete() {
    let Some(runtime) = get_test_runtime().await else {
        return;
    };
    let id = unique_id("rerun");

    let image = runtime.pull_image(NAMESPACE, IMAGE).await.unwrap();
    let spec = vec![
        SpecOpt::ImageConfig(image.config.clone()),
        SpecOpt::ProcessArgs(vec!["sh".into(), "-c".into(), "exit 0".into()]),
    ];
    let handle = runtime
        .new_container(NAMESPACE, &id, &id, &image, &spec)
        .await
        .unwrap();

    let task = runtime
        .new_task(NAMESPACE, &handle, IoConfig::Null)
        .await
        .unwrap();
    runtime.start_task(NAMESPACE, &task).await.unwrap();
    let waiter = runtime.wait_task(NAMESPACE, &task).await.unwrap();
    waiter.wait().await.unwrap();
    runtime.delete_task(NAMESPACE, &task).await.unwrap();

    // The last run stays visible as a stopped task
    let task = runtime.load_task(NAMESPACE, &handle).await.unwrap();
    assert_eq!(
        runtime.task_status(NAMESPACE, &task).await.unwrap(),
        TaskStatus::Stopped
    );

    let task = runtime
        .new_task(NAMESPACE, &handle, IoConfig::Null)
        .await
        .unwrap();
    runtime.start_task(NAMESPACE, &task).await.unwrap();
    let waiter = runtime.wait_task(NAMESPACE, &task).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(30), waiter.wait())
        .await
        .expect("second run did not exit")
        .unwrap();
    assert_eq!(status.code, 0);

    runtime.delete_task(NAMESPACE, &task).await.unwrap();
    cleanup(&runtime, &handle).await;
}

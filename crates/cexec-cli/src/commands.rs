//! CLI command implementations

use anyhow::Result;
use cexec_core::{LifecycleManager, TaskSpec};
use cexec_runtime::ContainerHandle;
use std::time::Duration;

/// Exit code reported for a task killed after running past its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 137;

/// Run a task to completion and return the exit code the executor should
/// exit with
pub async fn run_task(
    manager: &LifecycleManager,
    task: &TaskSpec,
    timeout: Option<Duration>,
) -> Result<i32> {
    let outcome = manager.run_to_completion(task, timeout).await?;

    if outcome.timed_out {
        eprintln!(
            "Task '{}' did not finish within {}s and was killed",
            task.id,
            timeout.map(|t| t.as_secs()).unwrap_or_default()
        );
        return Ok(TIMEOUT_EXIT_CODE);
    }

    let code = outcome.exit_code.unwrap_or_default();
    tracing::info!(id = %outcome.container_id, code, "task finished");
    // Codes past what a process can report are clamped
    Ok(i32::try_from(code).unwrap_or(i32::MAX))
}

/// Stop a task, killing it if it is still running
pub async fn stop(manager: &LifecycleManager, id: &str) -> Result<()> {
    manager.stop(&ContainerHandle::new(id)).await?;
    println!("Stopped '{}'", id);
    Ok(())
}

/// Remove a stopped task's container, or stop it first with `force`
pub async fn remove(manager: &LifecycleManager, id: &str, force: bool) -> Result<()> {
    let container = ContainerHandle::new(id);
    if force {
        manager.stop(&container).await?;
    }
    match manager.remove(&container).await {
        // A post-stop hook already removed it
        Err(e) if force && e.is_not_found() => {}
        result => result?,
    }
    println!("Removed '{}'", id);
    Ok(())
}

//! Docker Engine adapter using bollard
//!
//! The engine has no notion of namespaces or of a task separate from its
//! container, so both are emulated:
//! - the namespace is recorded as a container label and checked on every load;
//! - the task is the container's primary process. It exists once the
//!   container has been started at least once.
//!
//! Deleting a task cannot erase the engine's record of the last run, so after
//! `delete_task` the task is still loadable and reports `Stopped` with the
//! previous exit code; `wait` on it returns that code immediately. A new task
//! may be created for a container whose process is no longer live, which
//! starts the container again.

use crate::{
    ContainerHandle, ExitStatus, ExitWaiter, Image, ImageConfig, IoConfig, ProcessSpec, Result,
    RuntimeClient, RuntimeError, Signal, SpecOpt, TaskHandle, TaskStatus,
};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Label holding the namespace a container was created in
pub const NAMESPACE_LABEL: &str = "cexec.namespace";
/// Label holding the snapshot id requested at creation
pub const SNAPSHOT_LABEL: &str = "cexec.snapshot";

/// `StartedAt` reported for containers that never ran
const NEVER_STARTED: &str = "0001-01-01T00:00:00Z";

/// Runtime client backed by the Docker Engine API
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the engine and verify it answers
    pub async fn new(socket_path: &str) -> Result<Self> {
        let client = if socket_path.starts_with("http://") || socket_path.starts_with("https://")
        {
            Docker::connect_with_http(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?
        } else {
            let path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?
        };

        let runtime = Self { client };
        runtime.ping().await?;
        Ok(runtime)
    }

    /// Inspect a container, treating one from another namespace as missing
    async fn inspect_in_namespace(
        &self,
        namespace: &str,
        id: &str,
    ) -> Result<ContainerInspectResponse> {
        let details = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let label = details
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|labels| labels.get(NAMESPACE_LABEL));

        if label.map(String::as_str) != Some(namespace) {
            return Err(RuntimeError::NotFound(format!(
                "container {} in namespace {}",
                id, namespace
            )));
        }

        Ok(details)
    }
}

fn has_started(details: &ContainerInspectResponse) -> bool {
    details
        .state
        .as_ref()
        .and_then(|s| s.started_at.as_deref())
        .is_some_and(|started| !started.is_empty() && started != NEVER_STARTED)
}

/// Write one chunk of task output and flush it, so nothing is lost when the
/// executor exits right after the task
async fn forward<W: AsyncWrite + Unpin>(out: &mut W, chunk: &[u8]) -> std::io::Result<()> {
    out.write_all(chunk).await?;
    out.flush().await
}

/// True while the primary process is running or paused
fn is_live(details: &ContainerInspectResponse) -> bool {
    let status = details.state.as_ref().and_then(|s| s.status);
    matches!(
        to_task_status(status),
        TaskStatus::Running | TaskStatus::Paused | TaskStatus::Pausing
    )
}

fn exit_code(code: i64) -> u32 {
    u32::try_from(code).unwrap_or(u32::MAX)
}

fn to_task_status(status: Option<ContainerStateStatusEnum>) -> TaskStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => TaskStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) | Some(ContainerStateStatusEnum::RESTARTING) => {
            TaskStatus::Running
        }
        Some(ContainerStateStatusEnum::PAUSED) => TaskStatus::Paused,
        Some(ContainerStateStatusEnum::EXITED)
        | Some(ContainerStateStatusEnum::DEAD)
        | Some(ContainerStateStatusEnum::REMOVING) => TaskStatus::Stopped,
        _ => TaskStatus::Unknown,
    }
}

fn image_config(config: Option<bollard::models::ContainerConfig>) -> ImageConfig {
    config
        .map(|c| ImageConfig {
            entrypoint: c.entrypoint.unwrap_or_default(),
            cmd: c.cmd.unwrap_or_default(),
            env: c.env.unwrap_or_default(),
            working_dir: c.working_dir.filter(|d| !d.is_empty()),
        })
        .unwrap_or_default()
}

/// Build the engine's container config from a resolved process spec
fn container_config(
    namespace: &str,
    snapshot_id: &str,
    image: &Image,
    process: ProcessSpec,
) -> Config<String> {
    let labels = HashMap::from([
        (NAMESPACE_LABEL.to_string(), namespace.to_string()),
        (SNAPSHOT_LABEL.to_string(), snapshot_id.to_string()),
    ]);

    // An overridden argv replaces the image entrypoint as a whole.
    let (entrypoint, cmd) = if process.args_overridden {
        (Some(process.args), Some(Vec::new()))
    } else {
        (None, None)
    };

    let host_config = HostConfig {
        memory: Some(i64::try_from(process.memory_limit).unwrap_or(i64::MAX)),
        cpu_shares: Some(i64::try_from(process.cpu_shares).unwrap_or(i64::MAX)),
        ..Default::default()
    };

    Config {
        image: Some(image.name.clone()),
        entrypoint,
        cmd,
        env: if process.env.is_empty() {
            None
        } else {
            Some(process.env)
        },
        working_dir: process.cwd,
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        labels: Some(labels),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn pull_image(&self, namespace: &str, reference: &str) -> Result<Image> {
        // Images are global to the engine.
        tracing::debug!(namespace, image = reference, "pulling image");

        let options = CreateImageOptions {
            from_image: reference,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(RuntimeError::PullError(error));
                    }
                    if let Some(status) = info.status {
                        tracing::debug!("{}", status);
                    }
                }
                Err(e) => return Err(RuntimeError::PullError(e.to_string())),
            }
        }

        let inspect = self
            .client
            .inspect_image(reference)
            .await
            .map_err(|e| RuntimeError::PullError(e.to_string()))?;

        Ok(Image {
            name: reference.to_string(),
            config: image_config(inspect.config),
        })
    }

    async fn new_container(
        &self,
        namespace: &str,
        id: &str,
        snapshot_id: &str,
        image: &Image,
        spec: &[SpecOpt],
    ) -> Result<ContainerHandle> {
        let process = ProcessSpec::from_opts(spec);
        let config = container_config(namespace, snapshot_id, image, process);

        let options = CreateContainerOptions {
            name: id,
            platform: None,
        };

        let response = self.client.create_container(Some(options), config).await?;
        for warning in &response.warnings {
            tracing::warn!(id, "engine warning: {}", warning);
        }

        Ok(ContainerHandle::new(response.id))
    }

    async fn load_container(&self, namespace: &str, id: &str) -> Result<ContainerHandle> {
        let details = self.inspect_in_namespace(namespace, id).await?;
        Ok(ContainerHandle::new(
            details.id.unwrap_or_else(|| id.to_string()),
        ))
    }

    async fn new_task(
        &self,
        namespace: &str,
        container: &ContainerHandle,
        io: IoConfig,
    ) -> Result<TaskHandle> {
        let details = self.inspect_in_namespace(namespace, container.id()).await?;
        if is_live(&details) {
            return Err(RuntimeError::AlreadyExists(format!(
                "task for container {}",
                container
            )));
        }

        if io == IoConfig::Stdio {
            let options = AttachContainerOptions::<String> {
                stdout: Some(true),
                stderr: Some(true),
                stream: Some(true),
                ..Default::default()
            };
            let AttachContainerResults { mut output, .. } = self
                .client
                .attach_container(container.id(), Some(options))
                .await?;

            tokio::spawn(async move {
                let mut stdout = tokio::io::stdout();
                let mut stderr = tokio::io::stderr();
                while let Some(chunk) = output.next().await {
                    let written = match chunk {
                        Ok(LogOutput::StdErr { message }) => forward(&mut stderr, &message).await,
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            forward(&mut stdout, &message).await
                        }
                        Ok(_) => Ok(()),
                        Err(e) => {
                            tracing::debug!("attach stream closed: {}", e);
                            break;
                        }
                    };
                    if let Err(e) = written {
                        tracing::debug!("failed to forward task output: {}", e);
                        break;
                    }
                }
            });
        }

        Ok(TaskHandle::new(
            details.id.unwrap_or_else(|| container.id().to_string()),
        ))
    }

    async fn load_task(&self, namespace: &str, container: &ContainerHandle) -> Result<TaskHandle> {
        let details = self.inspect_in_namespace(namespace, container.id()).await?;
        if !has_started(&details) {
            return Err(RuntimeError::NotFound(format!(
                "task for container {}",
                container
            )));
        }

        Ok(TaskHandle::new(
            details.id.unwrap_or_else(|| container.id().to_string()),
        ))
    }

    async fn start_task(&self, _namespace: &str, task: &TaskHandle) -> Result<()> {
        self.client
            .start_container(&task.container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn task_status(&self, _namespace: &str, task: &TaskHandle) -> Result<TaskStatus> {
        let details = self
            .client
            .inspect_container(&task.container_id, None::<InspectContainerOptions>)
            .await?;
        Ok(to_task_status(details.state.and_then(|s| s.status)))
    }

    async fn wait_task(&self, _namespace: &str, task: &TaskHandle) -> Result<ExitWaiter> {
        let (tx, waiter) = ExitWaiter::channel();
        let client = self.client.clone();
        let id = task.container_id.clone();

        // `not-running` resolves immediately for an already exited container,
        // so an exit racing this registration is never lost.
        tokio::spawn(async move {
            let options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut stream = client.wait_container(&id, Some(options));
            let status = match stream.next().await {
                Some(Ok(response)) => Ok(ExitStatus {
                    code: exit_code(response.status_code),
                    exited_at: Some(Utc::now()),
                    error: response.error.and_then(|e| e.message),
                }),
                // bollard reports non-zero exits as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    Ok(ExitStatus::new(exit_code(code)))
                }
                Some(Err(e)) => Err(RuntimeError::from(e)),
                None => Err(RuntimeError::DaemonError(format!(
                    "wait stream for {} ended without an exit status",
                    id
                ))),
            };
            let _ = tx.send(status);
        });

        Ok(waiter)
    }

    async fn kill_task(&self, _namespace: &str, task: &TaskHandle, signal: Signal) -> Result<()> {
        let options = KillContainerOptions {
            signal: signal.as_str(),
        };
        self.client
            .kill_container(&task.container_id, Some(options))
            .await?;
        Ok(())
    }

    async fn delete_task(&self, _namespace: &str, task: &TaskHandle) -> Result<ExitStatus> {
        let details = self
            .client
            .inspect_container(&task.container_id, None::<InspectContainerOptions>)
            .await?;
        let state = details.state.unwrap_or_default();

        if state.running == Some(true) {
            return Err(RuntimeError::DaemonError(format!(
                "task {} is still running",
                task.container_id
            )));
        }

        Ok(ExitStatus {
            code: exit_code(state.exit_code.unwrap_or_default()),
            exited_at: state
                .finished_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            error: state.error.filter(|e| !e.is_empty()),
        })
    }

    async fn delete_container(
        &self,
        namespace: &str,
        container: &ContainerHandle,
        cleanup_snapshot: bool,
    ) -> Result<()> {
        self.inspect_in_namespace(namespace, container.id()).await?;

        let options = RemoveContainerOptions {
            v: cleanup_snapshot,
            ..Default::default()
        };
        self.client
            .remove_container(container.id(), Some(options))
            .await?;
        Ok(())
    }

    async fn delete_snapshot(&self, namespace: &str, snapshot_id: &str) -> Result<()> {
        // The engine creates and removes the writable layer together with the container.
        tracing::debug!(namespace, snapshot_id, "no standalone snapshot to delete");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpine() -> Image {
        Image {
            name: "alpine:3.19".to_string(),
            config: ImageConfig {
                entrypoint: Vec::new(),
                cmd: vec!["/bin/sh".to_string()],
                env: vec!["PATH=/bin".to_string()],
                working_dir: None,
            },
        }
    }

    #[test]
    fn test_container_config_labels_namespace_and_snapshot() {
        let image = alpine();
        let process = ProcessSpec::from_opts(&[SpecOpt::ImageConfig(image.config.clone())]);
        let config = container_config("mesos", "t1", &image, process);

        let labels = config.labels.unwrap();
        assert_eq!(labels.get(NAMESPACE_LABEL).map(String::as_str), Some("mesos"));
        assert_eq!(labels.get(SNAPSHOT_LABEL).map(String::as_str), Some("t1"));
        assert_eq!(config.image.as_deref(), Some("alpine:3.19"));
    }

    #[test]
    fn test_container_config_keeps_image_entrypoint_without_override() {
        let image = alpine();
        let process = ProcessSpec::from_opts(&[SpecOpt::ImageConfig(image.config.clone())]);
        let config = container_config("default", "t1", &image, process);

        assert!(config.entrypoint.is_none());
        assert!(config.cmd.is_none());
    }

    #[test]
    fn test_container_config_override_replaces_entrypoint() {
        let image = alpine();
        let process = ProcessSpec::from_opts(&[
            SpecOpt::ImageConfig(image.config.clone()),
            SpecOpt::ProcessArgs(vec!["sh".into(), "-c".into(), "echo hi".into()]),
            SpecOpt::MemoryLimit(0),
            SpecOpt::CpuShares(0),
        ]);
        let config = container_config("default", "t2", &image, process);

        assert_eq!(
            config.entrypoint,
            Some(vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()])
        );
        assert_eq!(config.cmd, Some(Vec::new()));
        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(0));
        assert_eq!(host.cpu_shares, Some(0));
    }

    #[test]
    fn test_task_status_mapping() {
        assert_eq!(
            to_task_status(Some(ContainerStateStatusEnum::RUNNING)),
            TaskStatus::Running
        );
        assert_eq!(
            to_task_status(Some(ContainerStateStatusEnum::EXITED)),
            TaskStatus::Stopped
        );
        assert_eq!(
            to_task_status(Some(ContainerStateStatusEnum::DEAD)),
            TaskStatus::Stopped
        );
        assert_eq!(
            to_task_status(Some(ContainerStateStatusEnum::CREATED)),
            TaskStatus::Created
        );
        assert_eq!(to_task_status(None), TaskStatus::Unknown);
    }

    #[test]
    fn test_has_started() {
        let mut details = ContainerInspectResponse {
            state: Some(bollard::models::ContainerState {
                started_at: Some(NEVER_STARTED.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!has_started(&details));

        details.state = Some(bollard::models::ContainerState {
            started_at: Some("2024-03-01T10:00:00.123Z".to_string()),
            ..Default::default()
        });
        assert!(has_started(&details));
    }

    #[test]
    fn test_only_live_tasks_block_a_new_task() {
        let with_status = |status| ContainerInspectResponse {
            state: Some(bollard::models::ContainerState {
                status: Some(status),
                started_at: Some("2024-03-01T10:00:00.123Z".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(is_live(&with_status(ContainerStateStatusEnum::RUNNING)));
        assert!(is_live(&with_status(ContainerStateStatusEnum::PAUSED)));
        // A stopped task was started once but may be started again
        assert!(!is_live(&with_status(ContainerStateStatusEnum::EXITED)));
        assert!(!is_live(&with_status(ContainerStateStatusEnum::CREATED)));
        assert!(!is_live(&ContainerInspectResponse::default()));
    }

    #[tokio::test]
    async fn test_forward_flushes_each_chunk() {
        let mut out = tokio::io::BufWriter::new(Vec::new());

        forward(&mut out, b"hello\n").await.unwrap();
        assert_eq!(out.get_ref().as_slice(), b"hello\n");
        assert!(out.buffer().is_empty());

        forward(&mut out, b"world\n").await.unwrap();
        assert_eq!(out.get_ref().as_slice(), b"hello\nworld\n");
    }

    #[test]
    fn test_negative_exit_codes_saturate() {
        assert_eq!(exit_code(137), 137);
        assert_eq!(exit_code(-1), u32::MAX);
    }
}

//! Docker runtime implementation using bollard
//!
//! Every container gets the same isolation profile: no network, read-only
//! root filesystem with the run workspace as the only writable bind mount,
//! memory/CPU/PID ceilings, and all capabilities dropped.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptions, KillContainerOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

use super::{ContainerIo, ContainerRequest, ContainerRuntime, OutputFrame, WORKSPACE_MOUNT};
use crate::core::{ExecutionError, ExecutionResult};

/// Scratch space for programs that insist on writing temp files
const TMPFS_OPTIONS: &str = "rw,noexec,nosuid,size=16m";

/// Runtime backed by the local Docker daemon
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using local defaults (`DOCKER_HOST` or the unix socket)
    pub fn connect() -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Check the daemon answers
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.docker
            .ping()
            .await
            .context("Docker daemon did not answer ping")?;
        Ok(())
    }

    /// Images from `images` that are not present locally.
    /// Runner images are built ahead of time and never pulled.
    pub async fn missing_images<'a>(&self, images: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut missing = Vec::new();
        for image in images {
            if self.docker.inspect_image(image).await.is_err() {
                missing.push(image.to_string());
            }
        }
        missing
    }

    fn host_config(request: &ContainerRequest) -> HostConfig {
        let profile = &request.profile;
        HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                request.workspace.display(),
                WORKSPACE_MOUNT
            )]),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                TMPFS_OPTIONS.to_string(),
            )])),
            network_mode: Some("none".to_string()),
            memory: Some(profile.memory_bytes),
            memory_swap: Some(profile.memory_bytes),
            cpu_period: Some(profile.cpu_period_us),
            cpu_quota: Some(profile.cpu_quota_us),
            pids_limit: Some(profile.pids_limit),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, request: &ContainerRequest) -> ExecutionResult<String> {
        let options = Some(CreateContainerOptions {
            name: Some(request.name.clone()),
            ..Default::default()
        });

        let config = ContainerCreateBody {
            image: Some(request.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                request.command.clone(),
            ]),
            working_dir: Some(WORKSPACE_MOUNT.to_string()),
            network_disabled: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(false),
            tty: Some(false),
            host_config: Some(Self::host_config(request)),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| ExecutionError::container("create", e))?;

        for warning in &response.warnings {
            warn!("Docker warning for container {}: {}", response.id, warning);
        }
        debug!("Created container {} ({})", response.id, request.name);

        Ok(response.id)
    }

    async fn attach(&self, container_id: &str) -> ExecutionResult<ContainerIo> {
        let options = AttachContainerOptionsBuilder::default()
            .stream(true)
            .stdin(true)
            .stdout(true)
            .stderr(true)
            .build();

        let results = self
            .docker
            .attach_container(container_id, Some(options))
            .await
            .map_err(|e| ExecutionError::container("attach", e))?;

        let output = results
            .output
            .filter_map(|frame| async move {
                match frame {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => Some(
                        Ok(OutputFrame::Stdout(String::from_utf8_lossy(&message).into_owned())),
                    ),
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::Stderr(
                        String::from_utf8_lossy(&message).into_owned(),
                    ))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(ExecutionError::container("attach", e))),
                }
            })
            .boxed();

        Ok(ContainerIo {
            output,
            input: results.input,
        })
    }

    async fn start(&self, container_id: &str) -> ExecutionResult<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| ExecutionError::container("start", e))
    }

    async fn wait(&self, container_id: &str) -> ExecutionResult<i64> {
        let mut stream = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(ExecutionError::container("wait", e)),
            None => Err(ExecutionError::container(
                "wait",
                "wait stream ended unexpectedly",
            )),
        }
    }

    async fn kill(&self, container_id: &str) -> ExecutionResult<()> {
        let options = KillContainerOptionsBuilder::default()
            .signal("SIGKILL")
            .build();
        self.docker
            .kill_container(container_id, Some(options))
            .await
            .map_err(|e| ExecutionError::container("kill", e))
    }

    async fn remove(&self, container_id: &str) -> ExecutionResult<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| ExecutionError::container("remove", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationProfile;
    use std::path::PathBuf;

    #[test]
    fn test_host_config_applies_isolation_profile() {
        let request = ContainerRequest {
            name: "run-abc".to_string(),
            image: "python-runner".to_string(),
            command: "python -u main.py".to_string(),
            workspace: PathBuf::from("/tmp/run-abc-x1"),
            profile: IsolationProfile::default(),
        };

        let host = DockerRuntime::host_config(&request);

        assert_eq!(host.binds, Some(vec!["/tmp/run-abc-x1:/workspace:rw".to_string()]));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.cpu_quota, Some(50_000));
        assert_eq!(host.pids_limit, Some(64));
    }
}

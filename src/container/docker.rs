use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};

use crate::errors::WardenError;
use crate::models::NetworkPolicy;
use super::runtime::{ContainerRuntime, ContainerSpec};

/// Docker engine via bollard.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, WardenError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| WardenError::Infrastructure(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), WardenError> {
        self.docker.ping().await
            .map_err(|e| WardenError::Infrastructure(format!("Docker is not reachable: {}", e)))?;
        Ok(())
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        let network_mode = match spec.network {
            NetworkPolicy::None => "none",
            NetworkPolicy::Egress => "bridge",
        };
        let binds = spec.scratch_volume.as_ref().map(|v| vec![format!("{}:/scratch", v)]);
        let tmpfs = spec.read_only_rootfs()
            .then(|| HashMap::from([("/tmp".to_string(), "rw,noexec,nosuid,size=64m".to_string())]));

        HostConfig {
            memory: Some((spec.limits.memory_mb * 1024 * 1024) as i64),
            memory_swap: Some((spec.limits.memory_mb * 1024 * 1024) as i64),
            nano_cpus: Some((spec.limits.cpus * 1_000_000_000.0) as i64),
            pids_limit: Some(spec.limits.pids),
            network_mode: Some(network_mode.to_string()),
            readonly_rootfs: Some(spec.read_only_rootfs()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            binds,
            tmpfs,
            ..Default::default()
        }
    }
}

fn infra(action: &str, e: DockerError) -> WardenError {
    match e {
        DockerError::DockerResponseServerError { status_code: 404, message } => {
            WardenError::Infrastructure(format!("Failed to {}: not found: {}", action, message))
        }
        other => WardenError::Infrastructure(format!("Failed to {}: {}", action, other)),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, WardenError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            labels: Some(spec.labels.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let created = self.docker.create_container(Some(options), config).await
            .map_err(|e| infra(&format!("create container from image '{}'", spec.image), e))?;

        if let Err(e) = self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.remove(&created.id).await;
            return Err(infra("start container", e));
        }

        info!(container = %spec.name, image = %spec.image, "Container started");
        Ok(created.id)
    }

    fn logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>, WardenError>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        self.docker.logs(id, Some(options))
            .map(|chunk| match chunk {
                Ok(output) => Ok(output.into_bytes().to_vec()),
                Err(e) => Err(infra("read container logs", e)),
            })
            .boxed()
    }

    async fn wait(&self, id: &str) -> Result<i64, WardenError> {
        let options = WaitContainerOptions { condition: "not-running" };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports nonzero exits as an error
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(infra("wait for container", e)),
            None => Err(WardenError::Infrastructure(format!("Wait stream for {} ended early", id))),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), WardenError> {
        match self.docker.kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" })).await {
            Ok(()) => Ok(()),
            // already stopped
            Err(DockerError::DockerResponseServerError { status_code: 409, .. }) => Ok(()),
            Err(e) => Err(infra("kill container", e)),
        }
    }

    async fn is_running(&self, id: &str) -> Result<bool, WardenError> {
        match self.docker.inspect_container(id, None).await {
            Ok(details) => Ok(details.state.and_then(|s| s.running).unwrap_or(false)),
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(infra("inspect container", e)),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), WardenError> {
        let options = RemoveContainerOptions { force: true, v: false, ..Default::default() };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => {
                debug!(container = %id, "Container removed");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(infra("remove container", e)),
        }
    }
}

//! Docker Engine backend.
//!
//! Each unit is one container created from the profile's runtime image with
//! the full constraint envelope applied through `HostConfig`.

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use tracing::{debug, instrument};

use super::{IsolationProvider, OutputFrame, UnitConstraints, UnitExit, UnitHandle};
use crate::error::ProviderError;

/// Seconds bollard waits on a single engine API call.
const API_TIMEOUT_SECS: u64 = 120;

/// Isolation provider backed by a Docker Engine daemon.
///
/// The client is cheap to clone and shared by all concurrent requests.
#[derive(Debug, Clone)]
pub struct DockerProvider {
    docker: Docker,
}

impl DockerProvider {
    /// Connect using the environment (`DOCKER_HOST`) or the platform default socket.
    pub fn connect() -> Result<Self, ProviderError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ProviderError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Connect to the daemon listening on a specific unix socket.
    pub fn connect_socket(path: &str) -> Result<Self, ProviderError> {
        let docker = Docker::connect_with_socket(path, API_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(|e| ProviderError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Connect(e.to_string()))
    }
}

/// Translate a constraint envelope into a container creation body.
fn container_body(image: &str, argv: &[String], c: &UnitConstraints) -> ContainerCreateBody {
    let host_config = HostConfig {
        network_mode: c.network_disabled.then(|| "none".to_string()),
        auto_remove: Some(c.auto_remove),
        readonly_rootfs: Some(c.read_only_root),
        cap_drop: c.drop_all_capabilities.then(|| vec!["ALL".to_string()]),
        security_opt: c
            .no_new_privileges
            .then(|| vec!["no-new-privileges".to_string()]),
        memory: Some(c.memory_limit_bytes),
        cpu_quota: Some(c.cpu_quota_micros),
        cpu_period: Some(c.cpu_period_micros),
        pids_limit: Some(c.max_processes),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(image.to_string()),
        cmd: Some(argv.to_vec()),
        user: Some(c.user.clone()),
        tty: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(c.network_disabled),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl IsolationProvider for DockerProvider {
    #[instrument(skip_all, fields(image = %image))]
    async fn create_unit(
        &self,
        image: &str,
        argv: &[String],
        constraints: &UnitConstraints,
    ) -> Result<UnitHandle, ProviderError> {
        let body = container_body(image, argv, constraints);
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(|e| ProviderError::Create(e.to_string()))?;

        for warning in &created.warnings {
            debug!(container = %created.id, warning = %warning, "Engine warning on create");
        }
        debug!(container = %created.id, "Container created");
        Ok(UnitHandle::new(created.id))
    }

    #[instrument(skip_all, fields(container = %unit))]
    async fn start_unit(&self, unit: &UnitHandle) -> Result<(), ProviderError> {
        self.docker
            .start_container(unit.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(|e| ProviderError::Start {
                unit: unit.to_string(),
                message: e.to_string(),
            })
    }

    #[instrument(skip_all, fields(container = %unit))]
    async fn wait_for_exit(&self, unit: &UnitHandle) -> Result<UnitExit, ProviderError> {
        let mut stream = self
            .docker
            .wait_container(unit.as_str(), None::<WaitContainerOptions>);

        match stream.next().await {
            Some(Ok(response)) => Ok(UnitExit {
                status_code: response.status_code,
            }),
            // bollard reports a non-zero exit as an error; the program still ran to the end
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => {
                Ok(UnitExit { status_code: code })
            }
            Some(Err(e)) => Err(ProviderError::Wait {
                unit: unit.to_string(),
                message: e.to_string(),
            }),
            None => Err(ProviderError::Wait {
                unit: unit.to_string(),
                message: "wait stream ended without a status".to_string(),
            }),
        }
    }

    #[instrument(skip_all, fields(container = %unit))]
    async fn fetch_output(&self, unit: &UnitHandle) -> Result<Vec<OutputFrame>, ProviderError> {
        let mut stream = self.docker.logs(
            unit.as_str(),
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut frames = Vec::new();
        while let Some(item) = stream.next().await {
            let frame = match item {
                Ok(LogOutput::StdOut { message }) => OutputFrame::Stdout(message.to_vec()),
                Ok(LogOutput::StdErr { message }) => OutputFrame::Stderr(message.to_vec()),
                Ok(LogOutput::Console { message } | LogOutput::StdIn { message }) => {
                    OutputFrame::Other(message.to_vec())
                }
                Err(e) => {
                    return Err(ProviderError::Fetch {
                        unit: unit.to_string(),
                        message: e.to_string(),
                    })
                }
            };
            frames.push(frame);
        }
        Ok(frames)
    }

    #[instrument(skip_all, fields(container = %unit))]
    async fn force_remove(&self, unit: &UnitHandle) -> Result<(), ProviderError> {
        self.docker
            .remove_container(
                unit.as_str(),
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ProviderError::NotFound(unit.to_string())
                } else {
                    ProviderError::Remove {
                        unit: unit.to_string(),
                        message: e.to_string(),
                    }
                }
            })
    }
}

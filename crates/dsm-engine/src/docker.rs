//! `bollard`-backed implementation of [`ContainerRuntime`].

use crate::config::ServiceConfig;
use crate::runtime::{ContainerRuntime, LogFeed, RuntimeResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{ContainerInspectResponse, ContainerSummary, EndpointSettings, ImageSummary};
use bollard::network::ConnectNetworkOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use dsm_common::{normalize_name, ServiceError};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Response timeout applied to every daemon request.
pub const REQUEST_TIMEOUT_SECS: u64 = 45;

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
}

impl DockerRuntime {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }

    pub fn client(&self) -> &Docker {
        &self.docker
    }
}

/// Connects to the daemon named by `DSM_DOCKER_HOST`, or the local defaults.
pub fn connect_docker(config: &ServiceConfig) -> Result<Docker> {
    let docker = match config.docker_host.as_deref() {
        Some(host) if host.starts_with("unix://") => {
            info!(%host, "Connecting to Docker over unix socket");
            Docker::connect_with_unix(host, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                .with_context(|| format!("Failed to connect to Docker at {host}"))?
        }
        Some(host) => {
            info!(%host, "Connecting to Docker over http");
            Docker::connect_with_http(host, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                .with_context(|| format!("Failed to connect to Docker at {host}"))?
        }
        None => Docker::connect_with_local_defaults()
            .context("Failed to connect to the local Docker daemon")?
            .with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
    };
    Ok(docker)
}

/// Maps a daemon failure onto the service error taxonomy.
pub fn classify(err: BollardError) -> ServiceError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => ServiceError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 304,
            message,
        } => ServiceError::AlreadyInDesiredState(message),
        BollardError::RequestTimeoutError => {
            ServiceError::Interrupted("request to the Docker daemon timed out".to_string())
        }
        other => ServiceError::Runtime(other.to_string()),
    }
}

/// Projects a daemon listing record onto the external summary shape.
pub fn map_summary(container: ContainerSummary) -> dsm_common::ContainerSummary {
    let name = container
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|name| normalize_name(name).to_string())
        .unwrap_or_default();

    dsm_common::ContainerSummary {
        id: container.id.unwrap_or_default(),
        name,
        image: container.image.unwrap_or_default(),
        state: container.state.unwrap_or_default(),
        status: container.status.unwrap_or_default(),
    }
}

/// Restart grace period in the width bollard expects; saturates on 16-bit targets.
fn restart_grace(timeout_secs: u32) -> isize {
    isize::try_from(timeout_secs).unwrap_or(isize::MAX)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, show_all: bool) -> RuntimeResult<Vec<ContainerSummary>> {
        self.docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: show_all,
                ..Default::default()
            }))
            .await
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspectResponse> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
    }

    async fn list_images(&self, reference: &str) -> RuntimeResult<Vec<ImageSummary>> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![reference.to_string()]);
        self.docker
            .list_images(Some(ListImagesOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await
    }

    async fn pull_image(&self, reference: &str) -> RuntimeResult<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|progress| async move {
                if let Some(status) = progress.status {
                    debug!(%status, "pull progress");
                }
                Ok(())
            })
            .await
    }

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: i64::from(timeout_secs),
                }),
            )
            .await
    }

    async fn restart_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()> {
        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    t: restart_grace(timeout_secs),
                }),
            )
            .await
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
    }

    async fn create_container(&self, name: &str, config: Config<String>) -> RuntimeResult<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };
        let created = self.docker.create_container(Some(options), config).await?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
    }

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
        aliases: Option<Vec<String>>,
    ) -> RuntimeResult<()> {
        let options = ConnectNetworkOptions {
            container: container_id.to_string(),
            endpoint_config: EndpointSettings {
                aliases,
                ..Default::default()
            },
        };
        self.docker.connect_network(network, options).await
    }

    fn read_logs(&self, id: &str, options: LogsOptions<String>) -> LogFeed {
        self.docker.logs(id, Some(options)).boxed()
    }
}

//! Docker access using bollard.
//!
//! The agent only needs two things from the container runtime: the list of
//! containers on this host and the image a given container runs. Both sit
//! behind [`ContainerRuntime`] so the scan lifecycle can be driven without a
//! Docker daemon.

use async_trait::async_trait;
use bollard::Docker;
use bollard::query_parameters::{
    InspectContainerOptions, InspectContainerOptionsBuilder, ListContainersOptions,
    ListContainersOptionsBuilder,
};

use crate::wire::ContainerInfo;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Every container on the host, running or not.
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// The image reference a container was started from.
    /// Returns `None` when the container does not exist.
    async fn container_image(&self, container_id: &str) -> Result<Option<String>, RuntimeError>;
}

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the default method for the platform
    /// (Unix socket on Linux/macOS, named pipe on Windows).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

fn strip_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let options: ListContainersOptions = ListContainersOptionsBuilder::new().all(true).build();

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .inspect_err(|e| log::error!("Failed to list containers: {e}"))?;

        let containers = summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|name| strip_name(name).to_string())
                    .unwrap_or_else(|| id.clone());
                let image = summary
                    .image
                    .or(summary.image_id)
                    .unwrap_or_default();
                let status = summary
                    .state
                    .map(|state| state.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Some(ContainerInfo {
                    id,
                    name,
                    image,
                    status,
                })
            })
            .collect();

        Ok(containers)
    }

    async fn container_image(&self, container_id: &str) -> Result<Option<String>, RuntimeError> {
        let options: InspectContainerOptions = InspectContainerOptionsBuilder::new().build();

        match self
            .docker
            .inspect_container(container_id, Some(options))
            .await
        {
            Ok(info) => {
                let image = info
                    .config
                    .and_then(|config| config.image)
                    .filter(|image| !image.is_empty())
                    .or(info.image);
                Ok(Some(image.unwrap_or_default()))
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(RuntimeError::DockerApi(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_name() {
        assert_eq!(strip_name("/web"), "web");
        assert_eq!(strip_name("db"), "db");
    }
}

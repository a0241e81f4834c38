//! Container source backed by the local Docker daemon

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::ContainerSummary;
use bollard::Docker;
use console_common::{ConsoleError, ContainerRecord, ContainerSource, Result};
use tracing::debug;

pub struct DockerSource {
    docker: Arc<Docker>,
}

impl DockerSource {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }

    /// Connect using the platform defaults (unix socket / named pipe,
    /// or `DOCKER_HOST`).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(daemon_error)?;
        Ok(Self::new(Arc::new(docker)))
    }
}

#[async_trait]
impl ContainerSource for DockerSource {
    async fn list_containers(&self, ids: Option<&[String]>) -> Result<Vec<ContainerRecord>> {
        let containers = self
            .docker
            .list_containers(Some(list_options(ids)))
            .await
            .map_err(daemon_error)?;

        debug!(count = containers.len(), filtered = ids.is_some(), "listed containers");
        Ok(containers.into_iter().map(record_from_summary).collect())
    }
}

/// All containers, optionally restricted by an `id` filter (OR over ids).
pub fn list_options(ids: Option<&[String]>) -> ListContainersOptions<String> {
    let mut filters = HashMap::new();
    if let Some(ids) = ids {
        filters.insert("id".to_string(), ids.to_vec());
    }

    ListContainersOptions {
        all: true,
        filters,
        ..Default::default()
    }
}

pub fn record_from_summary(summary: ContainerSummary) -> ContainerRecord {
    ContainerRecord {
        id: summary.id.unwrap_or_default(),
        names: summary.names.unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        image_id: summary.image_id.unwrap_or_default(),
        command: summary.command.unwrap_or_default(),
        created: summary.created.unwrap_or_default(),
        state: summary.state.unwrap_or_default(),
        status: summary.status.unwrap_or_default(),
        labels: summary.labels.unwrap_or_default().into_iter().collect(),
    }
}

fn daemon_error(err: bollard::errors::Error) -> ConsoleError {
    ConsoleError::Daemon(err.to_string())
}

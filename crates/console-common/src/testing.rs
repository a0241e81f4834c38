//! In-memory container source for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ConsoleError, ContainerRecord, ContainerSource, Result};

/// Serves a fixed container list and counts how often it was asked.
#[derive(Debug, Default)]
pub struct StaticSource {
    containers: Mutex<Vec<ContainerRecord>>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(containers: Vec<ContainerRecord>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Default::default()
        }
    }

    /// A source whose every call fails with a daemon error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    /// Replace the served containers, e.g. to simulate removals.
    pub fn set_containers(&self, containers: Vec<ContainerRecord>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerSource for StaticSource {
    async fn list_containers(&self, ids: Option<&[String]>) -> Result<Vec<ContainerRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(ConsoleError::Daemon(message.clone()));
        }

        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|c| ids.map_or(true, |ids| ids.contains(&c.id)))
            .cloned()
            .collect())
    }
}

/// Convenience constructor for a container record.
pub fn container(id: &str, name: &str, image: &str) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        names: vec![format!("/{name}")],
        image: image.to_string(),
        image_id: format!("sha256:{id}"),
        command: "/docker-entrypoint.sh".to_string(),
        created: 1_700_000_000,
        state: "running".to_string(),
        status: "Up 5 minutes".to_string(),
        ..Default::default()
    }
}

//! Background population of the container index

use std::sync::Arc;

use console_common::{ConsoleError, ContainerSource, Result};
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::ContainerIndex;

/// Progress of the background index build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Pending,
    Ready { documents: u64 },
    Failed { reason: String },
}

impl BuildState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, BuildState::Pending)
    }
}

/// Fetch every container (all states) and index it by identifier.
///
/// Returns the document count after the commit. Stops at the first
/// insertion failure; nothing is retried.
#[instrument(skip_all, fields(collection = index.name()))]
pub async fn build_index(
    index: Arc<ContainerIndex>,
    source: Arc<dyn ContainerSource>,
) -> Result<u64> {
    let containers = source.list_containers(None).await?;
    info!("Indexing {} containers", containers.len());

    let documents = tokio::task::spawn_blocking(move || index.insert_all(&containers))
        .await
        .map_err(|e| ConsoleError::Index(format!("indexing task failed: {e}")))??;

    info!(documents, "Index built");
    Ok(documents)
}

/// Handle to a detached index build.
pub struct IndexBuild {
    state: watch::Receiver<BuildState>,
}

impl IndexBuild {
    /// A build that never started.
    fn failed(reason: String) -> Self {
        let (_tx, rx) = watch::channel(BuildState::Failed { reason });
        Self { state: rx }
    }

    /// Receiver that observes the build state; never blocks callers.
    pub fn subscribe(&self) -> watch::Receiver<BuildState> {
        self.state.clone()
    }

    /// Wait until the build has either succeeded or failed.
    pub async fn wait(&mut self) -> BuildState {
        match self.state.wait_for(BuildState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => BuildState::Failed {
                reason: "index build task ended without reporting".to_string(),
            },
        }
    }
}

/// Start [`build_index`] on its own task. Failures are logged and published
/// as [`BuildState::Failed`]; there is no way to cancel the build.
pub fn spawn_index_build(
    index: Arc<ContainerIndex>,
    source: Arc<dyn ContainerSource>,
) -> IndexBuild {
    let (tx, rx) = watch::channel(BuildState::Pending);

    tokio::spawn(async move {
        let state = match build_index(index, source).await {
            Ok(documents) => BuildState::Ready { documents },
            Err(e) => {
                error!("Failed to build container index: {}", e);
                BuildState::Failed {
                    reason: e.to_string(),
                }
            }
        };
        tx.send_replace(state);
    });

    IndexBuild { state: rx }
}

/// Open the index with `open` and start building it.
///
/// An index that cannot be opened fails the build, not the caller: the error
/// is logged, published as [`BuildState::Failed`], and an empty in-memory
/// index is returned so queries keep answering with zero hits.
pub fn start_index_build<F>(
    open: F,
    source: Arc<dyn ContainerSource>,
) -> Result<(Arc<ContainerIndex>, IndexBuild)>
where
    F: FnOnce() -> Result<ContainerIndex>,
{
    match open() {
        Ok(index) => {
            let index = Arc::new(index);
            let build = spawn_index_build(index.clone(), source);
            Ok((index, build))
        }
        Err(e) => {
            error!("Failed to open container index: {}", e);
            let index = Arc::new(ContainerIndex::open_in_ram()?);
            Ok((index, IndexBuild::failed(e.to_string())))
        }
    }
}

//! HTTP front-end for docker-console
//!
//! Serves the container list (`/`) and search (`/search`) pages. All
//! container state comes from a [`ContainerSource`]; search goes through the
//! shared [`ContainerIndex`].

pub mod docker;
pub mod handlers;
pub mod templates;

use std::sync::Arc;

use axum::{routing::get, Router};
use console_common::ContainerSource;
use console_index::{BuildState, ContainerIndex};
use tokio::sync::watch;
use tracing::{debug, error};

pub use docker::DockerSource;
pub use handlers::{AppError, SearchParams};
pub use templates::{PageTemplate, TemplateSource};

/// Process-wide handles shared by every request.
pub struct AppState {
    pub source: Arc<dyn ContainerSource>,
    pub index: Arc<ContainerIndex>,
    pub search_page: PageTemplate,
    pub containers_page: PageTemplate,
    /// Progress of the background index build. Requests never wait on it.
    pub build_state: watch::Receiver<BuildState>,
}

impl AppState {
    pub fn new(
        source: Arc<dyn ContainerSource>,
        index: Arc<ContainerIndex>,
        templates: TemplateSource,
        build_state: watch::Receiver<BuildState>,
    ) -> Self {
        Self {
            source,
            index,
            search_page: PageTemplate::search(templates.clone()),
            containers_page: PageTemplate::containers(templates),
            build_state,
        }
    }

    /// Parse both page templates now so a broken template shows up in the
    /// log at startup. Requests still get the stored outcome.
    pub fn preload_templates(&self) {
        for page in [&self.search_page, &self.containers_page] {
            match page.load() {
                Ok(_) => debug!(template = page.name(), "template ready"),
                Err(e) => error!("Template {} failed to parse: {}", page.name(), e),
            }
        }
    }
}

/// Router with all console pages.
pub fn console_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::list_containers))
        .route("/search", get(handlers::search))
        .with_state(state)
}

//! HTTP handlers for the console pages

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use console_common::{ConsoleError, ContainerRecord};
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::templates::PageTemplate;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
}

/// Free-text search over the container index.
///
/// The hit count is the index total; the listed containers are only those
/// the daemon still knows about, so the list can be shorter than the count.
#[instrument(skip(state))]
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Response, AppError> {
    let env = load_page(&state.search_page)?;

    let query = params.q.unwrap_or_default();
    let results = if query.is_empty() {
        None
    } else {
        Some(find_containers(&state, &query).await?)
    };

    Ok(render_page(
        &state.search_page,
        env,
        SearchContext { query, results },
    ))
}

async fn find_containers(state: &AppState, query: &str) -> Result<SearchView, AppError> {
    if !state.build_state.borrow().is_settled() {
        debug!("index build still running, results may be incomplete");
    }

    let hits = state.index.search(query).map_err(|e| {
        error!("Search for {:?} failed: {}", query, e);
        AppError::from(e)
    })?;

    let containers = if hits.total > 0 {
        state
            .source
            .list_containers(Some(hits.ids.as_slice()))
            .await
            .map_err(|e| {
                error!("Failed to resolve search hits: {}", e);
                AppError::from(e)
            })?
    } else {
        Vec::new()
    };

    Ok(SearchView {
        hits: hits.total,
        containers: containers.iter().map(SearchHitView::from).collect(),
    })
}

/// Every container known to the daemon, in any state.
#[instrument(skip(state))]
pub async fn list_containers(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let env = load_page(&state.containers_page)?;

    let containers = state.source.list_containers(None).await.map_err(|e| {
        error!("Failed to list containers: {}", e);
        AppError::from(e)
    })?;

    Ok(render_page(
        &state.containers_page,
        env,
        ContainersContext {
            containers: containers.iter().map(ContainerRow::from).collect(),
        },
    ))
}

fn load_page(page: &PageTemplate) -> Result<&Environment<'static>, AppError> {
    page.load().map_err(|e| {
        error!("{}", e);
        AppError::from(e)
    })
}

/// Render with status 200. A render error can only be logged: the page is
/// returned with whatever was produced up to that point.
fn render_page<S: Serialize>(page: &PageTemplate, env: &Environment<'static>, context: S) -> Response {
    let rendered = page.render(env, context);
    if let Some(e) = rendered.error {
        error!("Failed to render {}: {}", page.name(), e);
    }
    Html(rendered.body).into_response()
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Serialize)]
struct SearchContext {
    query: String,
    results: Option<SearchView>,
}

#[derive(Debug, Serialize)]
pub struct SearchView {
    pub hits: u64,
    pub containers: Vec<SearchHitView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHitView {
    pub id: String,
    pub name: String,
}

impl From<&ContainerRecord> for SearchHitView {
    fn from(record: &ContainerRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.display_name().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ContainersContext {
    containers: Vec<ContainerRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerRow {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub state: String,
    pub status: String,
    pub status_color: &'static str,
    pub created: String,
}

impl From<&ContainerRecord> for ContainerRow {
    fn from(record: &ContainerRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.display_name().to_string(),
            image: record.image.clone(),
            image_id: record.image_id.clone(),
            state: record.state.clone(),
            status: record.status.clone(),
            status_color: record.status_color(),
            created: chrono::DateTime::from_timestamp(record.created, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Failure before any response bytes were produced: HTTP 500 with the
/// error text as a plain-text body.
#[derive(Debug)]
pub struct AppError(pub ConsoleError);

impl From<ConsoleError> for AppError {
    fn from(err: ConsoleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::{ArgAction, Parser};
use console_common::{ContainerSource, APPLICATION_NAME};
use console_gateway::{console_routes, AppState, DockerSource, TemplateSource};
use console_index::{start_index_build, ContainerIndex};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,docker_console=debug,console_gateway=debug,console_index=debug";

/// Browse and search Docker containers from a local web page.
#[derive(Debug, Parser)]
#[command(name = APPLICATION_NAME, version)]
struct Args {
    /// HTTP port
    #[arg(long, env = "DOCKER_CONSOLE_PORT", default_value_t = 4242)]
    port: u16,

    /// Open a browser tab when launching
    #[arg(long, env = "DOCKER_CONSOLE_OPEN", default_value_t = true, action = ArgAction::Set)]
    open: bool,

    /// Load page templates from this directory instead of the built-in ones
    #[arg(long, env = "DOCKER_CONSOLE_TEMPLATES")]
    templates: Option<PathBuf>,

    /// Serve only once the container index has been built
    #[arg(long)]
    wait_for_index: bool,
}

impl Args {
    fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let source: Arc<dyn ContainerSource> = Arc::new(DockerSource::connect()?);
    let (index, mut build) = start_index_build(ContainerIndex::open_in_cache_dir, source.clone())?;
    if args.wait_for_index {
        info!("Waiting for the container index...");
        let state = build.wait().await;
        info!(?state, "Container index settled");
    }

    let state = Arc::new(AppState::new(
        source,
        index,
        TemplateSource::from(args.templates.clone()),
        build.subscribe(),
    ));
    state.preload_templates();

    let app = console_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let url = args.url();
    if args.open {
        if let Err(e) = open::that(&url) {
            error!("Can't launch browser at {}: {}", url, e);
        }
    } else {
        info!("Application available at {}", url);
    }

    axum::serve(listener, app).await?;

    Ok(())
}

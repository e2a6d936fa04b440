//! ImageVault HTTP server: the thin Axum control surface over
//! `imagevault-core`. Owns process startup (config, store/queue backend
//! selection, background tasks) and delegates everything else to the
//! handlers and worker stage consumers.

mod config;
mod errors;
mod handlers;
mod routes;
mod state;
mod workers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use imagevault_core::cache_placement::CachePlacementEngine;
use imagevault_core::derivative::DerivativeGenerator;
use imagevault_core::image_proc::DefaultImageProcessor;
use imagevault_core::jobs::JobManager;
use imagevault_core::queue::{InMemoryQueue, WorkQueue};
use imagevault_core::store::{
    CacheFolderStore, CollectionStore, ImageStore, InMemoryStore, JobStore, StatsStore,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::ServerConfig;
use state::CoreServices;

/// Command-line overrides for a handful of deployment knobs, mirroring
/// the teacher's `Args` (everything else comes from the environment).
#[derive(Parser, Debug)]
#[command(name = "imagevault-server")]
#[command(about = "HTTP control surface for ImageVault")]
struct Args {
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(host) = args.host {
        config.server_host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagevault_server=info,imagevault_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("server configuration loaded");

    let (collections, images, cache_folders, jobs_store, stats): (
        Arc<dyn CollectionStore>,
        Arc<dyn ImageStore>,
        Arc<dyn CacheFolderStore>,
        Arc<dyn JobStore>,
        Arc<dyn StatsStore>,
    ) = match &config.database_url {
        Some(url) => {
            info!("connecting to postgres metadata store");
            let pool = sqlx::PgPool::connect(url).await?;
            let store = Arc::new(imagevault_core::store::postgres::PostgresStore::new(pool));
            store.migrate().await?;
            (store.clone(), store.clone(), store.clone(), store.clone(), store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory metadata store");
            let store = Arc::new(InMemoryStore::new());
            (store.clone(), store.clone(), store.clone(), store.clone(), store)
        }
    };

    let queue: Arc<dyn WorkQueue> = match &config.redis_url {
        Some(url) => {
            info!("connecting to redis work queue");
            Arc::new(imagevault_core::queue::RedisStreamQueue::connect(url).await?)
        }
        None => {
            warn!("REDIS_URL not set, using in-memory work queue");
            Arc::new(InMemoryQueue::new())
        }
    };

    let placement = Arc::new(CachePlacementEngine::new(cache_folders.clone()));
    let processor: Arc<dyn imagevault_core::image_proc::ImageProcessor> = Arc::new(DefaultImageProcessor);
    let derivatives = Arc::new(DerivativeGenerator::new(
        processor.clone(),
        placement.clone(),
        images.clone(),
        config.core.clone(),
    ));
    let jobs = Arc::new(JobManager::new(jobs_store.clone(), queue.clone(), config.core.clone()));

    let services = Arc::new(CoreServices {
        collections,
        images,
        cache_folders,
        jobs_store,
        stats,
        queue: queue.clone(),
        jobs: jobs.clone(),
        placement,
        derivatives,
        processor,
        config: config.core.clone(),
    });

    match imagevault_core::jobs::dlq::recover(queue.as_ref()).await {
        Ok(summary) => info!(?summary, "dead-letter recovery complete at startup"),
        Err(err) => error!(%err, "dead-letter recovery failed at startup"),
    }

    tokio::spawn(jobs.clone().run_retention_sweeper());
    workers::spawn_all(services.clone());

    let app = create_app(services, &config.cors_allowed_origins);

    let addr: SocketAddr = config.bind_addr().parse()?;
    info!(%addr, "starting imagevault-server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn create_app(services: Arc<CoreServices>, cors_allowed_origins: &[String]) -> Router {
    let origins: Vec<_> = cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    routes::create_router()
        .with_state(services)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

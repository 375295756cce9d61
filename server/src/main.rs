use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use photo_stamp_core::archive::ZipArchiver;
use photo_stamp_core::config::{OverlaySettings, ProcessingConfig};
use photo_stamp_core::pipeline::ImagePipeline;
use photo_stamp_core::registry::BatchRegistry;

mod handlers;

use handlers::AppState;

/// HTTP front end for the photo batch engine
#[derive(Debug, Parser)]
#[command(name = "photo_stamp_server", version, about)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "PHOTO_STAMP_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Where batch uploads, outputs and archives are kept
    #[arg(long, env = "PHOTO_STAMP_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Static files served for every path the API does not handle
    #[arg(long, env = "PHOTO_STAMP_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Logo placed above the watermark text
    #[arg(long, env = "PHOTO_STAMP_LOGO")]
    logo: Option<PathBuf>,

    /// TTF/OTF font for the watermark text
    #[arg(long, env = "PHOTO_STAMP_FONT")]
    font: Option<PathBuf>,

    /// Worker threads per batch (default: cores - 1, at most 4)
    #[arg(long)]
    workers: Option<usize>,

    /// Finished batches are deleted after this many seconds
    #[arg(long, default_value_t = 6 * 60 * 60)]
    ttl_secs: u64,

    /// Batches kept in memory before the oldest finished ones are evicted
    #[arg(long, default_value_t = 256)]
    max_batches: usize,

    /// Largest accepted upload, in megabytes
    #[arg(long, default_value_t = 1024)]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory {}", args.data_dir.display()))?;

    let config = ProcessingConfig {
        overlay: OverlaySettings {
            logo_path: args.logo.clone(),
            font_path: args.font.clone(),
            ..OverlaySettings::default()
        },
        workers: args.workers,
        ..ProcessingConfig::default()
    };
    let pipeline = ImagePipeline::from_config(config);
    if !pipeline.can_render_text() {
        log::warn!("No font loaded: only edit-only batches will be accepted");
    }

    let registry = Arc::new(BatchRegistry::new(
        Duration::from_secs(args.ttl_secs),
        args.max_batches,
    ));
    spawn_sweeper(registry.clone(), sweep_interval(args.ttl_secs));

    let state = AppState {
        registry,
        pipeline: Arc::new(pipeline),
        archiver: Arc::new(ZipArchiver),
        data_dir: args.data_dir.clone(),
    };
    let app = app(state, args.static_dir.as_deref(), args.max_upload_mb * 1024 * 1024);

    log::info!("Photo Stamp Server running on http://{}", args.bind);
    log::info!("API endpoints:");
    log::info!("   POST /batches - Upload photos and start a batch");
    log::info!("   GET  /batches/:id - Batch status");
    log::info!("   GET  /batches/:id/download - Zip of a finished batch");
    log::info!("   GET  /health - Health check");

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

pub(crate) fn app(state: AppState, static_dir: Option<&Path>, body_limit: usize) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/batches", post(handlers::create_batch))
        .route("/batches/:id", get(handlers::get_batch))
        .route("/batches/:id/download", get(handlers::download));

    let router = match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api.route("/", get(handlers::root)),
    };

    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn sweep_interval(ttl_secs: u64) -> Duration {
    Duration::from_secs((ttl_secs / 4).clamp(10, 300))
}

fn spawn_sweeper(registry: Arc<BatchRegistry>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let registry = registry.clone();
            match tokio::task::spawn_blocking(move || registry.evict_expired()).await {
                Ok(0) => {}
                Ok(n) => log::info!("Evicted {} expired batches", n),
                Err(e) => log::error!("Batch sweep failed: {}", e),
            }
        }
    });
}

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use ctseg_server::config::Config;
use ctseg_server::interactive::SeedGrowFactory;
use ctseg_server::{AppState, DockerCli, NiftiReader, api_routes};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Ensure a directory exists, creating it if necessary.
/// Returns true if directory exists and is empty.
fn ensure_directory(path: &Path, name: &str) -> std::io::Result<bool> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created {} directory: {:?}", name, path);
        Ok(true)
    } else if path.is_dir() {
        let is_empty = path.read_dir()?.next().is_none();
        Ok(is_empty)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} path {:?} exists but is not a directory", name, path),
        ))
    }
}

fn uptime_seconds() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime_seconds(),
    })
}

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Prometheus recorder not installed".to_string(),
        ),
    }
}

/// Update gauge metrics (called periodically)
fn update_gauge_metrics(state: &AppState) {
    let stats = state.stats();
    metrics::gauge!("ctseg_interactive_sessions_active").set(stats.interactive_sessions as f64);
    metrics::gauge!("ctseg_jobs_tracked").set(stats.tracked_jobs as f64);
    metrics::gauge!("ctseg_volumes_cached").set(stats.cached_volumes as f64);
    metrics::gauge!("ctseg_uptime_seconds").set(uptime_seconds() as f64);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Record server start time
    START_TIME.set(Instant::now()).ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ctseg_server=debug,ctseg=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize Prometheus metrics recorder (before any metrics are recorded)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            PROMETHEUS_HANDLE.set(handle).ok();
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}",
        config.host, config.port
    );
    info!(
        "Segmentation image: {} (timeout {:?}, platform {:?})",
        config.job.image, config.job.timeout, config.job.platform
    );

    // Ensure data directories exist (auto-create for dev-friendly startup)
    let storage = &config.storage;
    for (path, name) in [
        (&storage.upload_dir, "upload"),
        (&storage.output_dir, "output"),
        (&storage.preview_dir, "preview"),
    ] {
        if let Err(e) = ensure_directory(path, name) {
            warn!("Failed to create {} directory {:?}: {}", name, path, e);
        }
    }
    if !config.interactive.model_dir.is_dir() {
        warn!(
            "Model directory {:?} not found - interactive sessions will fail to initialize",
            config.interactive.model_dir
        );
    }

    let runtime = Arc::new(DockerCli::new(
        config.job.docker_bin.clone(),
        config.job.gpu_probe_bin.clone(),
    ));
    let app_state = AppState::new(
        &config,
        runtime,
        Arc::new(SeedGrowFactory::new()),
        Arc::new(NiftiReader::new()),
    );

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state);
        }
    });

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .nest("/api", api_routes(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Add static file serving if configured
    let app = if let Some(ref static_dir) = config.static_files.dir {
        if static_dir.exists() {
            info!("Serving static files from: {:?}", static_dir);

            // ServeDir with SPA fallback: serve index.html for any unmatched routes
            let index_path = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_path));

            let static_service = ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .service(serve_dir);

            app.fallback_service(static_service)
        } else {
            warn!(
                "Static files directory not found: {:?} - static file serving disabled",
                static_dir
            );
            app
        }
    } else {
        info!("Static file serving disabled (STATIC_FILES_DIR not set)");
        app
    };

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("ctseg server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

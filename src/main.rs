use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method},
};
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

mod backends;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use backends::{BackendKind, StorageBackend, b2::B2Backend, gcs::GcsBackend};
use services::library_service::LibraryService;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting song-library with config: {:?}", cfg);

    // --- Storage backend ---
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.upstream_timeout_secs))
        .build()
        .context("building HTTP client")?;

    let backend: Arc<dyn StorageBackend> = match cfg.backend {
        BackendKind::B2 => Arc::new(B2Backend::new(cfg.b2()?, client)),
        BackendKind::Gcs => Arc::new(GcsBackend::new(cfg.gcs(), client)),
    };

    // --- Initialize core service ---
    let library = LibraryService::new(backend, cfg.signed_url_ttl_secs);

    // Bad account keys are reported per request; warming up only logs.
    match library.ready().await {
        Ok(()) => tracing::info!("{} backend authorized", cfg.backend),
        Err(err) => tracing::warn!("initial {} authorization failed: {}", cfg.backend, err),
    }

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes)
        .with_state(library)
        .layer(cors_layer(&cfg.cors_origins))
        .layer(TraceLayer::new_for_http());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// CORS for browser players: the configured origins, or any origin when
/// none are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("ignoring invalid CORS origin {}: {}", origin, err);
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(parsed)
    }
}

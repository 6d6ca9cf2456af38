//! Audio depot server binary.
//!
//! Accepts recording uploads with JSON metadata, stores them in a single
//! directory under a name derived from recording time and device id, and
//! serves listing, download and health endpoints over that directory.

mod atomic;
mod config;
mod error;
mod files;
mod http;
mod listing;
mod logging;
mod media;
mod naming;
mod routes;
mod storage;
mod timestamp;
mod upload;

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::{build_cors_layer, extract_forwarded_ip};
use crate::storage::Storage;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let config = Arc::new(args.service_config());
    let storage = Arc::new(Storage::new(config.upload_dir.clone()));
    storage.ensure_root().await?;
    match storage.sweep_staged().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "cleaned stale upload temp files"),
        Err(err) => warn!(error = %err, "failed to sweep upload temp files"),
    }

    info!(upload_dir = %storage.root_path().display(), "storage ready");
    info!(api_prefix = config.api_prefix, "routes mounted");
    if let Some(base_url) = config.public_base_url.as_deref() {
        info!(public_base_url = base_url, "file links use public base url");
    }

    let mut app = routes::build_router(storage, config, args.max_upload_size).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let connect_ip = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip());
                let client_ip = extract_forwarded_ip(request.headers())
                    .or(connect_ip)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip,
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("Starting HTTP server at {}", http_addr);

    let server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}

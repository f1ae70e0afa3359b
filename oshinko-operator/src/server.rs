//! The HTTP server for healthchecks & Prometheus metrics.

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::{extract::Extension, routing::get, AddExtensionLayer, Router};
use futures::prelude::*;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Spawn the HTTP server.
///
/// The `/metrics` endpoint answers `404` when no metrics handle is given.
pub fn spawn_http_server(config: Arc<Config>, metrics: Option<PrometheusHandle>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<()>> {
    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/metrics", get(prometheus_scrape))
        .layer(AddExtensionLayer::new(metrics));
    let server = axum::Server::bind(&([0, 0, 0, 0], config.http_port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!("http server is listening at 0.0.0.0:{}", config.http_port);
    tokio::spawn(server.map_err(anyhow::Error::from))
}

/// Handle Prometheus metrics scraping.
async fn prometheus_scrape(Extension(state): Extension<Option<PrometheusHandle>>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    match state {
        Some(handle) => {
            headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
            (StatusCode::OK, headers, handle.render())
        }
        None => (StatusCode::NOT_FOUND, headers, String::new()),
    }
}

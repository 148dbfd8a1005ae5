pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Router, ServiceExt,
    extract::Request,
    http::{HeaderValue, Method, header},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use tower::{Layer, ServiceBuilder, limit::GlobalConcurrencyLimitLayer};
use tower_http::{
    cors::{Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn};

use crate::config::AppConfig;
use api::{
    health_controller::health_endpoint, metrics_controller::metrics_endpoint,
    proxy_controller::ProxyController, stream_controller::StreamController,
};
use services::edge_services::EdgeServices;
use utils::proxy_routes::PROXY_BASE_PATH;

pub const STREAM_BASE_PATH: &str = "/api/v1/stream";

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub struct EdgeApplicationServer;

impl EdgeApplicationServer {
    /// the full app without the listener, tests drive this with oneshot
    pub fn router(services: EdgeServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);
        let max_concurrent = services.config.max_concurrent_requests;

        Router::new()
            .route("/health", get(health_endpoint))
            .route("/metrics", get(metrics_endpoint))
            .nest(PROXY_BASE_PATH, ProxyController::app())
            .nest(STREAM_BASE_PATH, StreamController::app())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                        info_span!(
                            "request",
                            id = %nanoid::nanoid!(10),
                            method = %request.method(),
                            path = %request.uri().path(),
                        )
                    }))
                    .layer(cors)
                    // one semaphore for the whole app, not one per route
                    .layer(GlobalConcurrencyLimitLayer::new(max_concurrent))
                    .layer(Extension(services)),
            )
    }

    fn cors_layer(cors_origin: &str) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::RANGE, header::CONTENT_TYPE, header::ACCEPT_ENCODING])
            .expose_headers([
                header::CONTENT_LENGTH,
                header::CONTENT_RANGE,
                header::ACCEPT_RANGES,
            ]);

        if cors_origin.trim() == "*" {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring invalid cors origin {}", o);
                    None
                }
            })
            .collect();

        layer.allow_origin(origins)
    }

    pub async fn serve(config: Arc<AppConfig>) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let metrics = PrometheusBuilder::new()
            .install_recorder()
            .context("could not install the prometheus recorder")?;

        let services = EdgeServices::new(config.clone(), Some(metrics))?;

        // trailing slash trimming has to wrap the router, inside it the route is already picked
        let app = NormalizePathLayer::trim_trailing_slash().layer(Self::router(services));

        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("could not bind {}", addr))?;

        info!("routes initialized, listening on {}", addr);

        axum::serve(
            listener,
            ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("error while starting API server")?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining connections...");
}

use axum::Extension;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::server::services::edge_services::EdgeServices;

/// prometheus text format. 404 when the binary didn't install a recorder (tests, embedding)
pub async fn metrics_endpoint(Extension(services): Extension<EdgeServices>) -> Response {
    match &services.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

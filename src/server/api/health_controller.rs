use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::error;

use crate::server::dtos::health_dto::{
    ExtractorHealth, HealthResponse, HealthStatus, ServiceHealthDetails,
};
use crate::server::services::edge_services::EdgeServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// the proxy itself has nothing to check, so the extractor decides between healthy and
/// degraded. playlists and segments keep working without it, so this never goes unhealthy
pub async fn health_endpoint(
    Extension(services): Extension<EdgeServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let extractor_health = check_extractor_health(&services).await;

    let overall_status = match extractor_health.status {
        HealthStatus::Healthy => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    };

    let response = HealthResponse {
        status: overall_status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: services.config.environment_name().to_string(),
        services: ServiceHealthDetails {
            extractor: extractor_health,
        },
    };

    let http_status = match overall_status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

async fn check_extractor_health(services: &EdgeServices) -> ExtractorHealth {
    match services.extractor.health_check().await {
        Ok(response_time) => ExtractorHealth {
            status: HealthStatus::Healthy,
            response_time_ms: response_time,
        },
        Err(e) => {
            error!("Extractor health check failed: {:#}", e);
            ExtractorHealth {
                status: HealthStatus::Unhealthy,
                response_time_ms: 0.0,
            }
        }
    }
}

use axum::Extension;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use tracing::debug;

use crate::server::error::Error;
use crate::server::services::edge_services::EdgeServices;

/// anonymous client id plus the services, proxy handlers take this instead of two extractors
pub struct EdgeClient(pub String, pub EdgeServices);

/// generates a client identifier from IP address and user-agent, only ever used in logs
pub fn generate_client_id(ip: Option<&str>, user_agent: Option<&str>) -> String {
    let mut hasher = DefaultHasher::new();
    ip.unwrap_or("unknown").hash(&mut hasher);
    user_agent.unwrap_or("unknown").hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

impl<S> FromRequestParts<S> for EdgeClient
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<EdgeServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        let user_agent = parts.headers.get(USER_AGENT).and_then(|h| h.to_str().ok());

        // behind a reverse proxy the socket address is the proxy's, so headers go first
        let client_ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get("x-real-ip")
                    .and_then(|h| h.to_str().ok())
                    .map(|s| s.to_string())
            })
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ci| ci.0.ip().to_string())
            });

        let client_id = generate_client_id(client_ip.as_deref(), user_agent);
        debug!("client {} from {:?}", client_id, client_ip);

        Ok(EdgeClient(client_id, services))
    }
}

// the two routes every rewritten playlist points back at. /m3u8 buffers and rewrites, /segment
// never looks at the bytes and just pipes them through
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, error, info};

use crate::server::{
    dtos::proxy_dto::ProxyQuery,
    error::{AppResult, Error},
    extractors::{EdgeClient, ValidatedQuery},
    services::fetch_services::UpstreamRequest,
    utils::{
        ContentEncoding, ManifestRewriter,
        proxy_routes::{MANIFEST_PATH, SEGMENT_PATH},
    },
};

/// upstream headers a player may care about. everything else (cookies, server, cors from the
/// origin) stays behind
const RELAYED_HEADERS: &[HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::CONTENT_ENCODING,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
    header::EXPIRES,
];

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        Router::new()
            .route(MANIFEST_PATH, get(Self::manifest_get).options(Self::proxy_options))
            .route(SEGMENT_PATH, get(Self::segment_get).options(Self::proxy_options))
    }

    /// build m3u8 response with proper headers and optional compression
    fn build_m3u8_response(processed_body: &str, headers: &HeaderMap) -> AppResult<Response> {
        // apple's player sends gzip or identity, never zstd, so this has to follow the client
        let encoding = ContentEncoding::from_accept_encoding(
            headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.apple.mpegurl"),
        );
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response_headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));

        let response_body = encoding.compress(processed_body.as_bytes()).map_err(|e| {
            error!("Failed to compress response with {:?}: {}", encoding, e);
            Error::InternalServerErrorWithContext("Failed to compress response".to_string())
        })?;

        if let Some(enc_header) = encoding.as_header_value() {
            debug!(
                "Compressed M3U8 with {:?} from {} to {} bytes",
                encoding,
                processed_body.len(),
                response_body.len()
            );
            response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(enc_header));
        }

        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(response_body.len()));

        Ok((StatusCode::OK, response_headers, response_body).into_response())
    }

    async fn manifest_get(
        EdgeClient(client_id, services): EdgeClient,
        ValidatedQuery(params): ValidatedQuery<ProxyQuery>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let reference = params.reference()?;
        debug!("client {} wants playlist {}", client_id, reference.target_url);

        let request = UpstreamRequest::for_reference(&reference)?.compressed();
        let upstream = services.fetcher.fetch(request).await?;

        let encoding =
            ContentEncoding::from_content_encoding(upstream.header_str(header::CONTENT_ENCODING))
                .map_err(Error::BadGateway)?;
        // relative uris resolve against where the redirects actually landed us
        let base_url = upstream.final_url.to_string();

        // the limit applies twice, to what comes over the wire and to what it inflates into
        let limit = services.config.max_manifest_bytes;
        let raw = upstream.collect_limited(limit).await?;
        let decompressed = encoding.decompress(&raw, limit).map_err(|e| {
            error!("Failed to decompress {:?} playlist from {}: {}", encoding, base_url, e);
            Error::BadGateway(format!("upstream sent an unusable playlist: {}", e))
        })?;
        let text = String::from_utf8(decompressed)
            .map_err(|_| Error::BadGateway("upstream playlist is not utf-8".to_string()))?;

        let rewritten = ManifestRewriter::new(&services.routes).rewrite(
            &text,
            &base_url,
            reference.referer.as_deref(),
            Some(&reference.extra_headers),
        )?;

        metrics::counter!("manifest_rewrites_total").increment(1);
        info!(
            "client {} got playlist {} ({} -> {} bytes)",
            client_id,
            base_url,
            text.len(),
            rewritten.len()
        );

        Self::build_m3u8_response(&rewritten, &headers)
    }

    async fn segment_get(
        EdgeClient(client_id, services): EdgeClient,
        ValidatedQuery(params): ValidatedQuery<ProxyQuery>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let reference = params.reference()?;

        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!(
            "client {} wants {} (range {:?})",
            client_id, reference.target_url, range
        );

        let request = UpstreamRequest::for_reference(&reference)?.with_range(range);
        let upstream = services.fetcher.fetch(request).await?;

        let mut response_headers = HeaderMap::new();
        for name in RELAYED_HEADERS {
            if let Some(value) = upstream.headers.get(name) {
                response_headers.insert(name.clone(), value.clone());
            }
        }

        metrics::counter!("segments_relayed_total").increment(1);

        // dropping this body (client went away) drops the upstream response with it
        Ok((upstream.status, response_headers, Body::from_stream(upstream.body)).into_response())
    }

    async fn proxy_options() -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }
}

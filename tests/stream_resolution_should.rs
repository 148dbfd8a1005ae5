use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use hls_relay::{
    AppConfig, EdgeApplicationServer,
    server::{
        dtos::source_dto::{AudioCategory, RawSource, ServerSelection, SourceType},
        services::{
            DynExtractorService, DynFetchService,
            edge_services::EdgeServices,
            extractor_services::{ExtractorServiceTrait, MockExtractorServiceTrait},
            fetch_services::MockFetchServiceTrait,
            stream_services::{ResolutionError, StreamsService, StreamsServiceTrait},
        },
        utils::{ProxyRoutes, reference_codec},
    },
};
use serde_json::{Value, json};
use tower::ServiceExt;

fn source(value: Value) -> RawSource {
    serde_json::from_value(value).unwrap()
}

fn service(extractor: MockExtractorServiceTrait) -> StreamsService {
    StreamsService::new(
        Arc::new(extractor) as DynExtractorService,
        ProxyRoutes::default(),
        Duration::from_secs(5),
    )
}

fn token_of(proxy_url: &str) -> &str {
    proxy_url.split_once("?token=").unwrap().1
}

#[tokio::test]
async fn test_build_a_bundle_from_the_extractor() {
    let mut extractor = MockExtractorServiceTrait::new();
    extractor
        .expect_get_episode_sources()
        .withf(|id, selection| {
            id == "one-piece-100"
                && selection.server == "hd-2"
                && selection.category == AudioCategory::Dub
        })
        .times(1)
        .returning(|_, _| {
            Ok(vec![
                source(json!({
                    "url": "https://cdn.example/hls/master.m3u8",
                    "type": "hls",
                    "quality": "1080p",
                    "headers": {"Referer": "https://site.example/", "Origin": "https://site.example"},
                    "tracks": [{"file": "https://subs.example/en.vtt", "label": "English"}],
                    "intro": {"start": 30.0, "end": 110.5},
                })),
                source(json!({
                    "url": "https://cdn.example/files/ep.mp4",
                    "type": "mp4",
                    "headers": {"referer": "https://other.example/"},
                    "subtitles": [
                        {"file": "https://subs.example/en.vtt", "label": "English"},
                        {"file": "https://subs.example/es.vtt", "label": "Spanish"}
                    ],
                    "intro": {"start": 1.0, "end": 2.0},
                    "outro": {"start": 1300.0, "end": 1390.0},
                })),
            ])
        });

    let selection = ServerSelection {
        server: "hd-2".to_string(),
        category: AudioCategory::Dub,
    };
    let bundle = service(extractor).resolve("one-piece-100", &selection).await.unwrap();

    assert_eq!(bundle.sources.len(), 2);

    let hls = &bundle.sources[0];
    assert_eq!(hls.file, "https://cdn.example/hls/master.m3u8");
    assert_eq!(hls.quality, "1080p");
    assert_eq!(hls.source_type, SourceType::Hls);
    assert!(hls.proxy_url.starts_with("/api/v1/proxy/m3u8?token="));
    let reference = reference_codec::decode(token_of(&hls.proxy_url)).unwrap();
    assert_eq!(reference.target_url, hls.file);
    assert_eq!(reference.referer.as_deref(), Some("https://site.example/"));
    assert_eq!(reference.extra_headers.len(), 1);
    assert_eq!(reference.extra_headers["Origin"], "https://site.example");

    let direct = &bundle.sources[1];
    assert_eq!(direct.source_type, SourceType::Direct);
    assert_eq!(direct.quality, "auto");
    assert!(direct.proxy_url.starts_with("/api/v1/proxy/segment?token="));
    let reference = reference_codec::decode(token_of(&direct.proxy_url)).unwrap();
    assert_eq!(reference.referer.as_deref(), Some("https://other.example/"));

    // headers of the first usable source, subtitles merged without duplicates
    assert_eq!(bundle.headers["Referer"], "https://site.example/");
    let files: Vec<&str> = bundle.subtitles.iter().map(|t| t.file.as_str()).collect();
    assert_eq!(files, ["https://subs.example/en.vtt", "https://subs.example/es.vtt"]);
    assert_eq!(bundle.intro.unwrap().start, 30.0);
    assert_eq!(bundle.outro.unwrap().end, 1390.0);
}

#[tokio::test]
async fn test_skip_unusable_sources() {
    let mut extractor = MockExtractorServiceTrait::new();
    extractor.expect_get_episode_sources().returning(|_, _| {
        Ok(vec![
            source(json!({"url": "//cdn.example/relative.m3u8", "type": "hls"})),
            source(json!({"url": "https://cdn.example/ok.m3u8", "type": "m3u8"})),
        ])
    });

    let bundle = service(extractor)
        .resolve("ep", &ServerSelection::default())
        .await
        .unwrap();

    assert_eq!(bundle.sources.len(), 1);
    assert_eq!(bundle.sources[0].file, "https://cdn.example/ok.m3u8");
}

#[tokio::test]
async fn test_hand_out_tokens_the_proxy_accepts() {
    let mut extractor = MockExtractorServiceTrait::new();
    extractor.expect_get_episode_sources().returning(|_, _| {
        Ok(vec![
            source(json!({
                "url": "  https://cdn.example/hls/master.m3u8\n",
                "type": "hls",
                "headers": {
                    "Referer": "megacloud.blog",
                    "Origin": "https://megacloud.blog",
                    "Bad Header": "x"
                }
            })),
            source(json!({
                "url": "https://cdn.example/files/ep.mp4",
                "type": "direct",
                "headers": {"referer": "not a referer at all"}
            })),
        ])
    });

    let bundle = service(extractor)
        .resolve("ep", &ServerSelection::default())
        .await
        .unwrap();

    assert_eq!(bundle.sources.len(), 2);

    let hls = &bundle.sources[0];
    assert_eq!(hls.file, "https://cdn.example/hls/master.m3u8");
    let reference = reference_codec::decode(token_of(&hls.proxy_url)).unwrap();
    assert_eq!(reference.target_url, "https://cdn.example/hls/master.m3u8");
    assert_eq!(reference.referer.as_deref(), Some("https://megacloud.blog/"));
    assert_eq!(reference.extra_headers.len(), 1);
    assert_eq!(reference.extra_headers["Origin"], "https://megacloud.blog");

    let direct = &bundle.sources[1];
    let reference = reference_codec::decode(token_of(&direct.proxy_url)).unwrap();
    assert_eq!(reference.target_url, "https://cdn.example/files/ep.mp4");
    assert!(reference.referer.is_none());
}

#[tokio::test]
async fn test_report_when_nothing_is_playable() {
    let mut extractor = MockExtractorServiceTrait::new();
    extractor
        .expect_get_episode_sources()
        .returning(|_, _| Ok(vec![source(json!({"url": "not a url", "type": "iframe"}))]));

    let err = service(extractor)
        .resolve("ep-9", &ServerSelection::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ResolutionError::NoServersAvailable {
            episode_id: "ep-9".to_string(),
            server: "hd-1".to_string(),
        }
    );
}

#[tokio::test]
async fn test_surface_extractor_failures() {
    let mut extractor = MockExtractorServiceTrait::new();
    extractor
        .expect_get_episode_sources()
        .times(1)
        .returning(|_, _| Err(anyhow!("sidecar exploded")));

    let err = service(extractor)
        .resolve("ep", &ServerSelection::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ResolutionError::UpstreamExtractionFailed(reason) if reason.contains("sidecar exploded")));
}

struct StuckExtractor;

#[async_trait]
impl ExtractorServiceTrait for StuckExtractor {
    async fn get_episode_sources(
        &self,
        _episode_id: &str,
        _selection: &ServerSelection,
    ) -> anyhow::Result<Vec<RawSource>> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(Vec::new())
    }

    async fn health_check(&self) -> anyhow::Result<f64> {
        Ok(0.0)
    }
}

#[tokio::test]
async fn test_give_up_on_a_stuck_extractor() {
    let streams = StreamsService::new(
        Arc::new(StuckExtractor) as DynExtractorService,
        ProxyRoutes::default(),
        Duration::from_millis(50),
    );

    let err = streams
        .resolve("ep", &ServerSelection::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ResolutionError::UpstreamExtractionFailed(_)));
}

fn app(extractor: MockExtractorServiceTrait) -> axum::Router {
    let services = EdgeServices::with_components(
        Arc::new(AppConfig::default()),
        Arc::new(MockFetchServiceTrait::new()) as DynFetchService,
        Arc::new(extractor) as DynExtractorService,
        None,
    );
    EdgeApplicationServer::router(services)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_serve_bundles_over_http() {
    let mut extractor = MockExtractorServiceTrait::new();
    extractor
        .expect_get_episode_sources()
        .withf(|id, selection| id == "ep-1" && selection.server == "hd-1" && selection.category == AudioCategory::Sub)
        .returning(|_, _| {
            Ok(vec![source(json!({
                "url": "https://cdn.example/a.m3u8",
                "type": "hls",
                "headers": {"Referer": "https://site.example/"}
            }))])
        });

    let (status, body) = get_json(app(extractor), "/api/v1/stream/ep-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["sources"][0]["file"], "https://cdn.example/a.m3u8");
    assert_eq!(body["data"]["sources"][0]["type"], "hls");
    assert_eq!(body["data"]["headers"]["Referer"], "https://site.example/");
    assert!(body["data"].get("intro").is_none());
}

#[tokio::test]
async fn test_map_resolution_errors_to_statuses() {
    let mut empty = MockExtractorServiceTrait::new();
    empty.expect_get_episode_sources().returning(|_, _| Ok(Vec::new()));
    let (status, body) = get_json(app(empty), "/api/v1/stream/ep-1?server=hd-2&category=raw").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let mut broken = MockExtractorServiceTrait::new();
    broken
        .expect_get_episode_sources()
        .returning(|_, _| Err(anyhow!("timeout talking to the site")));
    let (status, _) = get_json(app(broken), "/api/v1/stream/ep-1").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, _) = get_json(app(MockExtractorServiceTrait::new()), "/api/v1/stream/ep-1?category=loud").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_report_degraded_health_without_the_extractor() {
    let mut extractor = MockExtractorServiceTrait::new();
    extractor
        .expect_health_check()
        .returning(|| Err(anyhow!("connection refused")));

    let (status, body) = get_json(app(extractor), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["extractor"]["status"], "unhealthy");
    assert_eq!(body["environment"], "development");
}

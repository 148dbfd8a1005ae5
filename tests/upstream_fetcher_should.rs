use std::collections::BTreeMap;
use std::time::Duration;

use hls_relay::AppConfig;
use hls_relay::server::services::fetch_services::{
    FetchError, FetchService, FetchServiceTrait, RetryPolicy, UpstreamRequest,
};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(config: &AppConfig) -> FetchService {
    FetchService::new(FetchService::build_client(config).unwrap(), config).with_policy(RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    })
}

fn request(server: &MockServer, route: &str) -> UpstreamRequest {
    let url = Url::parse(&format!("{}{}", server.uri(), route)).unwrap();
    UpstreamRequest::new(
        url,
        BTreeMap::from([("Referer".to_string(), "https://site.example/".to_string())]),
    )
}

#[tokio::test]
async fn test_retry_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seg.ts"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/seg.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"segment".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let config = AppConfig::default();
    let response = fetcher(&config).fetch(request(&server, "/seg.ts")).await.unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.collect_limited(1024).await.unwrap(), b"segment");
}

#[tokio::test]
async fn test_not_retry_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expired.ts"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let config = AppConfig::default();
    let err = fetcher(&config)
        .fetch(request(&server, "/expired.ts"))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::UpstreamRejected { status: 403 });
}

#[tokio::test]
async fn test_give_up_after_the_retry_bound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down.ts"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let config = AppConfig::default();
    let err = fetcher(&config)
        .fetch(request(&server, "/down.ts"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::UpstreamUnavailable { attempts: 3, .. }));
}

#[tokio::test]
async fn test_time_out_slow_origins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.ts"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = AppConfig {
        upstream_request_timeout_secs: 1,
        ..AppConfig::default()
    };
    let fetcher = FetchService::new(FetchService::build_client(&config).unwrap(), &config)
        .with_policy(RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        });

    let err = fetcher.fetch(request(&server, "/slow.ts")).await.unwrap_err();

    assert!(matches!(err, FetchError::UpstreamUnavailable { attempts: 1, .. }));
}

#[tokio::test]
async fn test_send_caller_headers_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/key.bin"))
        .and(header("referer", "https://site.example/"))
        .and(header("user-agent", "CustomPlayer/1.0"))
        .and(header("accept-encoding", "identity"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 16]))
        .expect(1)
        .mount(&server)
        .await;

    let mut req = request(&server, "/key.bin");
    req.headers
        .insert("User-Agent".to_string(), "CustomPlayer/1.0".to_string());

    let config = AppConfig::default();
    let response = fetcher(&config).fetch(req).await.unwrap();

    assert_eq!(response.collect_limited(1024).await.unwrap(), vec![7u8; 16]);
}

#[tokio::test]
async fn test_fall_back_to_the_default_user_agent() {
    let config = AppConfig::default();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.m3u8"))
        .and(header("user-agent", config.default_user_agent.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
        .expect(1)
        .mount(&server)
        .await;

    let response = fetcher(&config)
        .fetch(request(&server, "/index.m3u8").compressed())
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
}

#[tokio::test]
async fn test_forward_range_and_keep_partial_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movie.mp4"))
        .and(header("range", "bytes=0-99"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-99/500")
                .set_body_bytes(vec![1u8; 100]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = AppConfig::default();
    let response = fetcher(&config)
        .fetch(request(&server, "/movie.mp4").with_range(Some("bytes=0-99".to_string())))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 206);
    assert_eq!(response.header_str(axum::http::header::CONTENT_RANGE), Some("bytes 0-99/500"));
    assert_eq!(response.collect_limited(1024).await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_refuse_oversized_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/huge.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'#'; 4096]))
        .mount(&server)
        .await;

    let config = AppConfig::default();
    let response = fetcher(&config).fetch(request(&server, "/huge.m3u8")).await.unwrap();

    assert_eq!(
        response.collect_limited(1024).await.unwrap_err(),
        FetchError::BodyTooLarge { limit: 1024 }
    );
}

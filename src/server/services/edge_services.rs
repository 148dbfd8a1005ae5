use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::{config::AppConfig, server::utils::ProxyRoutes};

use super::{
    extractor_services::{DynExtractorService, HttpExtractorService},
    fetch_services::{DynFetchService, FetchService},
    stream_services::{DynStreamsService, StreamsService},
};

/// everything a handler needs, handed out through an Extension. stateless apart from the
/// connection pool, so cloning is just a handful of arc bumps
#[derive(Clone)]
pub struct EdgeServices {
    pub config: Arc<AppConfig>,
    pub routes: ProxyRoutes,
    pub fetcher: DynFetchService,
    pub extractor: DynExtractorService,
    pub streams: DynStreamsService,
    pub metrics: Option<PrometheusHandle>,
}

impl EdgeServices {
    pub fn new(config: Arc<AppConfig>, metrics: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        info!("starting edge services...");

        // one pool for origins and the extractor alike
        let http = FetchService::build_client(&config)?;

        let fetcher = Arc::new(FetchService::new(http.clone(), &config)) as DynFetchService;
        let extractor =
            Arc::new(HttpExtractorService::new(http, &config.extractor_url)) as DynExtractorService;

        info!(
            "http client ok, extractor at {}, starting remaining services...",
            config.extractor_url
        );

        Ok(Self::with_components(config, fetcher, extractor, metrics))
    }

    /// wires the services around an already built fetcher and extractor, tests hand in mocks here
    pub fn with_components(
        config: Arc<AppConfig>,
        fetcher: DynFetchService,
        extractor: DynExtractorService,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let routes = ProxyRoutes::new(config.public_base_url.as_deref());

        let streams = Arc::new(StreamsService::new(
            extractor.clone(),
            routes.clone(),
            config.resolution_timeout(),
        )) as DynStreamsService;

        Self {
            config,
            routes,
            fetcher,
            extractor,
            streams,
            metrics,
        }
    }
}

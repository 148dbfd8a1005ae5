use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use mockall::automock;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::server::{
    dtos::{
        source_dto::{RawSource, ServerSelection, SourceType},
        stream_dto::{StreamBundle, StreamSource},
    },
    utils::{OpaqueReference, ProxyRoutes},
};

use super::extractor_services::DynExtractorService;

pub type DynStreamsService = Arc<dyn StreamsServiceTrait + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no playable sources for episode {episode_id} on {server}")]
    NoServersAvailable { episode_id: String, server: String },
    #[error("source extraction failed: {0}")]
    UpstreamExtractionFailed(String),
}

#[automock]
#[async_trait]
pub trait StreamsServiceTrait {
    async fn resolve(
        &self,
        episode_id: &str,
        selection: &ServerSelection,
    ) -> Result<StreamBundle, ResolutionError>;
}

pub struct StreamsService {
    extractor: DynExtractorService,
    routes: ProxyRoutes,
    timeout: Duration,
}

impl StreamsService {
    pub fn new(extractor: DynExtractorService, routes: ProxyRoutes, timeout: Duration) -> Self {
        Self {
            extractor,
            routes,
            timeout,
        }
    }

    /// `None` when the source can't be turned into a token our own routes would accept
    fn to_stream_source(&self, source: &RawSource) -> Option<StreamSource> {
        let (referer, headers) = split_referer(&source.headers);
        let referer = referer.and_then(|r| normalize_referer(&r));
        let headers = replayable_headers(headers);

        let reference = OpaqueReference::new(source.url.clone(), referer, Some(headers));
        let reference = match reference.validate() {
            Ok(reference) => reference,
            Err(e) => {
                warn!("skipping source {}: {}", source.url, e);
                return None;
            }
        };

        let proxy_url = match source.source_type {
            SourceType::Hls => self.routes.manifest_url(&reference),
            SourceType::Iframe | SourceType::Direct => self.routes.segment_url(&reference),
        };

        Some(StreamSource {
            file: source.url.clone(),
            proxy_url,
            quality: source.quality.clone().unwrap_or_else(|| "auto".to_string()),
            source_type: source.source_type,
        })
    }
}

/// the referer travels in its own token field, whatever casing the extractor used
fn split_referer(headers: &BTreeMap<String, String>) -> (Option<String>, BTreeMap<String, String>) {
    let mut referer = None;
    let mut rest = BTreeMap::new();

    for (name, value) in headers {
        if name.eq_ignore_ascii_case("referer") {
            referer.get_or_insert_with(|| value.clone());
        } else {
            rest.insert(name.clone(), value.clone());
        }
    }

    (referer, rest)
}

fn absolute_http(candidate: &str) -> Option<Url> {
    Url::parse(candidate)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

/// scrapers like handing out a bare host ("megacloud.blog"), origins want a full url
fn normalize_referer(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Some(url) = absolute_http(raw) {
        return Some(url.to_string());
    }

    if !raw.is_empty() && !raw.contains("://") {
        if let Some(url) = absolute_http(&format!("https://{}", raw)) {
            debug!("upgraded bare referer {} to {}", raw, url);
            return Some(url.to_string());
        }
    }

    warn!("dropping unusable referer {:?}", raw);
    None
}

/// drops anything reqwest couldn't send as a header anyway
fn replayable_headers(headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .into_iter()
        .filter(|(name, value)| {
            let ok = HeaderName::from_bytes(name.as_bytes()).is_ok()
                && HeaderValue::from_str(value).is_ok();
            if !ok {
                warn!("dropping unusable header {:?} from extractor", name);
            }
            ok
        })
        .collect()
}

#[async_trait]
impl StreamsServiceTrait for StreamsService {
    async fn resolve(
        &self,
        episode_id: &str,
        selection: &ServerSelection,
    ) -> Result<StreamBundle, ResolutionError> {
        let raw = tokio::time::timeout(
            self.timeout,
            self.extractor.get_episode_sources(episode_id, selection),
        )
        .await
        .map_err(|_| {
            ResolutionError::UpstreamExtractionFailed(format!(
                "extractor took longer than {:?}",
                self.timeout
            ))
        })?
        .map_err(|e| ResolutionError::UpstreamExtractionFailed(format!("{:#}", e)))?;

        let total = raw.len();
        let mut usable = Vec::with_capacity(total);
        for mut source in raw {
            source.url = source.url.trim().to_string();
            if let Some(stream) = self.to_stream_source(&source) {
                usable.push((source, stream));
            }
        }

        if usable.is_empty() {
            warn!(
                "episode {} on {} came back with {} source(s), none playable",
                episode_id, selection.server, total
            );
            return Err(ResolutionError::NoServersAvailable {
                episode_id: episode_id.to_string(),
                server: selection.server.clone(),
            });
        }

        let mut bundle = StreamBundle {
            headers: usable[0].0.headers.clone(),
            ..StreamBundle::default()
        };
        let mut seen_subtitles = HashSet::new();
        let playable = usable.len();

        for (source, stream) in usable {
            bundle.sources.push(stream);

            for track in source.subtitles {
                if seen_subtitles.insert(track.file.clone()) {
                    bundle.subtitles.push(track);
                }
            }

            bundle.intro = bundle.intro.or(source.intro);
            bundle.outro = bundle.outro.or(source.outro);
        }

        metrics::counter!("stream_resolutions_total").increment(1);
        info!(
            "resolved episode {} on {}/{}: {} of {} source(s) usable",
            episode_id,
            selection.server,
            selection.category,
            playable,
            total
        );

        Ok(bundle)
    }
}

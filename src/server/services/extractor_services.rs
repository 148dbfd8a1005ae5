// talks to the extraction sidecar. scraping, anti-bot and html parsing all happen over there,
// this side only ever sees the finished source list
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use mockall::automock;
use serde::Deserialize;
use tracing::debug;

use crate::server::dtos::source_dto::{RawSource, ServerSelection};

pub type DynExtractorService = Arc<dyn ExtractorServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait ExtractorServiceTrait {
    async fn get_episode_sources(
        &self,
        episode_id: &str,
        selection: &ServerSelection,
    ) -> anyhow::Result<Vec<RawSource>>;

    /// round trip in ms
    async fn health_check(&self) -> anyhow::Result<f64>;
}

// the sidecar answers either with a bare list or wrapped in the usual envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum SourcesPayload {
    Wrapped {
        success: bool,
        #[serde(default)]
        data: Vec<RawSource>,
        #[serde(default)]
        error: Option<String>,
    },
    Bare(Vec<RawSource>),
}

pub struct HttpExtractorService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExtractorService {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ExtractorServiceTrait for HttpExtractorService {
    async fn get_episode_sources(
        &self,
        episode_id: &str,
        selection: &ServerSelection,
    ) -> anyhow::Result<Vec<RawSource>> {
        let url = format!(
            "{}/episodes/{}/sources",
            self.base_url,
            urlencoding::encode(episode_id)
        );
        let category = selection.category.to_string();

        debug!("asking extractor for {} ({}/{})", episode_id, selection.server, category);

        let response = self
            .http
            .get(&url)
            .query(&[("server", selection.server.as_str()), ("category", category.as_str())])
            .send()
            .await
            .context("extractor unreachable")?;

        let status = response.status();
        if !status.is_success() {
            bail!("extractor answered {} for episode {}", status, episode_id);
        }

        let payload: SourcesPayload = response
            .json()
            .await
            .context("extractor sent an unreadable source list")?;

        match payload {
            SourcesPayload::Bare(sources) => Ok(sources),
            SourcesPayload::Wrapped { success: true, data, .. } => Ok(data),
            SourcesPayload::Wrapped { error, .. } => Err(anyhow!(
                "extractor failed: {}",
                error.unwrap_or_else(|| "no reason given".to_string())
            )),
        }
    }

    async fn health_check(&self) -> anyhow::Result<f64> {
        let start = Instant::now();

        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("extractor unreachable")?;

        if !response.status().is_success() {
            bail!("extractor health answered {}", response.status());
        }

        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}

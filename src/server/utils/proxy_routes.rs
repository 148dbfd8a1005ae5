use super::reference_codec::OpaqueReference;

/// where the proxy controller is nested in the router
pub const PROXY_BASE_PATH: &str = "/api/v1/proxy";
pub const MANIFEST_PATH: &str = "/m3u8";
pub const SEGMENT_PATH: &str = "/segment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    /// fetch, rewrite and return a playlist
    Manifest,
    /// relay raw bytes (segments, keys, init sections, direct files)
    Segment,
}

impl ProxyRoute {
    pub fn path(self) -> &'static str {
        match self {
            Self::Manifest => MANIFEST_PATH,
            Self::Segment => SEGMENT_PATH,
        }
    }
}

/// builds the urls we hand to players, both from the rewriter and the stream resolution
#[derive(Debug, Clone, Default)]
pub struct ProxyRoutes {
    prefix: String,
}

impl ProxyRoutes {
    pub fn new(public_base_url: Option<&str>) -> Self {
        let prefix = public_base_url
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .unwrap_or_default();

        Self { prefix }
    }

    pub fn url_for(&self, route: ProxyRoute, reference: &OpaqueReference) -> String {
        format!(
            "{}{}{}?token={}",
            self.prefix,
            PROXY_BASE_PATH,
            route.path(),
            reference.encode()
        )
    }

    pub fn manifest_url(&self, reference: &OpaqueReference) -> String {
        self.url_for(ProxyRoute::Manifest, reference)
    }

    pub fn segment_url(&self, reference: &OpaqueReference) -> String {
        self.url_for(ProxyRoute::Segment, reference)
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::source_dto::{AudioCategory, DEFAULT_SERVER, ServerSelection, SkipMarker, SourceType, SubtitleTrack};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSource {
    /// raw upstream url, only fetchable with `StreamBundle::headers`
    pub file: String,
    /// same source through our proxy, playable as is
    pub proxy_url: String,
    pub quality: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct StreamBundle {
    pub sources: Vec<StreamSource>,
    pub subtitles: Vec<SubtitleTrack>,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro: Option<SkipMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outro: Option<SkipMarker>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StreamQuery {
    #[validate(length(min = 1, max = 32, message = "server must be between 1 and 32 characters"))]
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default)]
    pub category: AudioCategory,
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

impl StreamQuery {
    pub fn selection(self) -> ServerSelection {
        ServerSelection {
            server: self.server,
            category: self.category,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

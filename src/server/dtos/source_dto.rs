// what the extraction sidecar hands back. field names follow its json, which is why there are a
// few aliases floating around
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[serde(alias = "m3u8")]
    Hls,
    #[serde(alias = "embed")]
    Iframe,
    #[serde(alias = "mp4", alias = "file")]
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCategory {
    #[default]
    Sub,
    Dub,
    Raw,
}

impl fmt::Display for AudioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sub => "sub",
            Self::Dub => "dub",
            Self::Raw => "raw",
        };
        f.write_str(name)
    }
}

pub const DEFAULT_SERVER: &str = "hd-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSelection {
    pub server: String,
    pub category: AudioCategory,
}

impl Default for ServerSelection {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            category: AudioCategory::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub file: String,
    #[serde(default)]
    pub label: String,
}

/// second offsets into the episode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkipMarker {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawSource {
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, alias = "tracks")]
    pub subtitles: Vec<SubtitleTrack>,
    #[serde(default)]
    pub intro: Option<SkipMarker>,
    #[serde(default)]
    pub outro: Option<SkipMarker>,
}

//! HLS playlist rewriting.
//!
//! Single pass over the playlist, one record per `\n`. Every record keeps its own terminator so
//! whatever we don't touch comes back byte for byte, and HLS cares about order since tags apply
//! to the uri line that follows them.
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::proxy_routes::{ProxyRoute, ProxyRoutes};
use super::reference_codec::OpaqueReference;

// URI has to start the attribute list or follow a comma, otherwise SERVER-URI and friends match
static URI_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|[:,])\s*URI="([^"]*)""#).expect("valid uri attribute regex"));

/// tags whose URI attribute names another playlist
const PLAYLIST_URI_TAGS: &[&str] = &[
    "EXT-X-MEDIA",
    "EXT-X-I-FRAME-STREAM-INF",
    "EXT-X-RENDITION-REPORT",
];

/// tags whose URI attribute names bytes we relay untouched
const RESOURCE_URI_TAGS: &[&str] = &[
    "EXT-X-KEY",
    "EXT-X-SESSION-KEY",
    "EXT-X-MAP",
    "EXT-X-PART",
    "EXT-X-PRELOAD-HINT",
    "EXT-X-SESSION-DATA",
];

/// the uri line after this tag is a variant playlist whatever its extension says
const VARIANT_TAG: &str = "EXT-X-STREAM-INF";

const MANIFEST_EXTENSIONS: &[&str] = &[".m3u8", ".m3u"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("manifest base url {url} is not usable: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("could not resolve {uri} against the manifest: {reason}")]
    UnresolvableUri { uri: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    /// `#` line that isn't an `#EXT` tag
    Comment,
    Tag,
    Uri,
}

/// a uri inside a line, with its byte span in `ManifestLine::raw`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedUri<'a> {
    pub value: &'a str,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine<'a> {
    /// line content without its terminator
    pub raw: &'a str,
    /// `\n`, `\r\n`, or empty for a final record with no newline
    pub terminator: &'a str,
    pub kind: LineKind,
    pub tag_name: Option<&'a str>,
    pub embedded_uri: Option<EmbeddedUri<'a>>,
}

impl<'a> ManifestLine<'a> {
    pub fn parse(record: &'a str) -> Self {
        let (raw, terminator) = split_terminator(record);
        let trimmed = raw.trim().trim_start_matches('\u{feff}');

        let line = |kind, tag_name, embedded_uri| Self {
            raw,
            terminator,
            kind,
            tag_name,
            embedded_uri,
        };

        if trimmed.is_empty() {
            return line(LineKind::Blank, None, None);
        }

        if !trimmed.starts_with('#') {
            let start = raw.find(trimmed).unwrap_or(0);
            let uri = EmbeddedUri {
                value: trimmed,
                start,
                end: start + trimmed.len(),
            };
            return line(LineKind::Uri, None, Some(uri));
        }

        if !trimmed.starts_with("#EXT") {
            return line(LineKind::Comment, None, None);
        }

        let tag_name = trimmed[1..].split(':').next().unwrap_or_default();
        let carries_uri =
            PLAYLIST_URI_TAGS.contains(&tag_name) || RESOURCE_URI_TAGS.contains(&tag_name);

        let embedded_uri = if carries_uri {
            // search after the tag name so the tag itself never matches
            let offset = raw.find(':').unwrap_or(raw.len());
            URI_ATTRIBUTE
                .captures(&raw[offset..])
                .and_then(|caps| caps.get(1))
                .map(|m| EmbeddedUri {
                    value: m.as_str(),
                    start: offset + m.start(),
                    end: offset + m.end(),
                })
        } else {
            None
        };

        line(LineKind::Tag, Some(tag_name), embedded_uri)
    }
}

/// splits a playlist into records, terminators kept
pub fn parse_manifest(text: &str) -> impl Iterator<Item = ManifestLine<'_>> {
    text.split_inclusive('\n').map(ManifestLine::parse)
}

fn split_terminator(record: &str) -> (&str, &str) {
    if let Some(body) = record.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = record.strip_suffix('\n') {
        (body, "\n")
    } else {
        (record, "")
    }
}

/// playlists open with an `#EXT` tag. anything else (html error pages, json, plain garbage) is
/// handed back as is instead of getting every line turned into a proxy url
fn looks_like_playlist(text: &str) -> bool {
    text.lines()
        .map(|l| l.trim().trim_start_matches('\u{feff}'))
        .find(|l| !l.is_empty())
        .is_some_and(|l| l.starts_with("#EXT"))
}

fn is_manifest_path(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    MANIFEST_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub struct ManifestRewriter<'a> {
    routes: &'a ProxyRoutes,
}

impl<'a> ManifestRewriter<'a> {
    pub fn new(routes: &'a ProxyRoutes) -> Self {
        Self { routes }
    }

    /// Rewrites every reference in `manifest_text` into a proxy url.
    ///
    /// Relative uris resolve against `manifest_base_url` (the url the playlist was actually
    /// fetched from), absolute ones are kept as they are. Every produced token carries `referer`
    /// and `extra_headers` so nested playlists and segments get fetched the same way the
    /// playlist was. Either the whole playlist is rewritten or an error comes back.
    pub fn rewrite(
        &self,
        manifest_text: &str,
        manifest_base_url: &str,
        referer: Option<&str>,
        extra_headers: Option<&BTreeMap<String, String>>,
    ) -> Result<String, RewriteError> {
        if !looks_like_playlist(manifest_text) {
            warn!(
                "body from {} doesn't look like a playlist, passing it through",
                manifest_base_url
            );
            return Ok(manifest_text.to_string());
        }

        let base = Url::parse(manifest_base_url).map_err(|e| RewriteError::InvalidBaseUrl {
            url: manifest_base_url.to_string(),
            reason: e.to_string(),
        })?;

        let parent = OpaqueReference::new(
            manifest_base_url,
            referer.map(str::to_string),
            extra_headers.cloned(),
        );

        let mut out = String::with_capacity(manifest_text.len() * 2);
        let mut next_is_variant = false;
        let mut rewritten = 0usize;

        for line in parse_manifest(manifest_text) {
            let replacement = match (line.kind, line.embedded_uri) {
                (LineKind::Tag, Some(uri)) => {
                    let route = match line.tag_name {
                        Some(tag) if PLAYLIST_URI_TAGS.contains(&tag) => ProxyRoute::Manifest,
                        _ => ProxyRoute::Segment,
                    };
                    self.proxy_url(&parent, &base, uri.value, Some(route))?
                        .map(|proxied| (uri, proxied))
                }
                (LineKind::Uri, Some(uri)) => {
                    let forced = next_is_variant.then_some(ProxyRoute::Manifest);
                    next_is_variant = false;
                    self.proxy_url(&parent, &base, uri.value, forced)?
                        .map(|proxied| (uri, proxied))
                }
                _ => None,
            };

            match replacement {
                Some((uri, proxied)) => {
                    out.push_str(&line.raw[..uri.start]);
                    out.push_str(&proxied);
                    out.push_str(&line.raw[uri.end..]);
                    rewritten += 1;
                }
                None => out.push_str(line.raw),
            }
            out.push_str(line.terminator);

            if line.tag_name == Some(VARIANT_TAG) {
                next_is_variant = true;
            }
        }

        debug!("rewrote {} uris in playlist from {}", rewritten, base);

        Ok(out)
    }

    /// `None` means leave the uri alone (empty, data:, skd:, ...)
    fn proxy_url(
        &self,
        parent: &OpaqueReference,
        base: &Url,
        raw_uri: &str,
        forced_route: Option<ProxyRoute>,
    ) -> Result<Option<String>, RewriteError> {
        let raw_uri = raw_uri.trim();
        if raw_uri.is_empty() {
            return Ok(None);
        }

        // absolute wins and is kept verbatim, only relative references get resolved
        let (target, resolved) = match Url::parse(raw_uri) {
            Ok(absolute) => (raw_uri.to_string(), absolute),
            Err(_) => {
                let joined = base
                    .join(raw_uri)
                    .map_err(|e| RewriteError::UnresolvableUri {
                        uri: raw_uri.to_string(),
                        reason: e.to_string(),
                    })?;
                (joined.to_string(), joined)
            }
        };

        if !matches!(resolved.scheme(), "http" | "https") {
            return Ok(None);
        }

        let route = forced_route.unwrap_or(if is_manifest_path(&resolved) {
            ProxyRoute::Manifest
        } else {
            ProxyRoute::Segment
        });

        Ok(Some(self.routes.url_for(route, &parent.child(target))))
    }
}

//! Opaque reference tokens.
//!
//! A token carries an upstream url plus the referer and headers the origin wants, packed into a
//! single query-safe string so header-less players can hit our routes instead of the origin.
//!
//! v1 layout, before base64url (no padding):
//!
//! ```text
//! [version: u8 = 1] [deflate(json record) ...] [sha256(version ++ deflated)[..8]]
//! ```
//!
//! The digest is not a signature, anyone can mint a token. It only makes sure a flipped or
//! truncated token gets refused instead of decoding into some other url.
use std::collections::BTreeMap;
use std::io::{Read, Write};

use axum::http::{HeaderName, HeaderValue};
use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

const TOKEN_VERSION: u8 = 1;
const DIGEST_LEN: usize = 8;
// a few kb of url and headers is already a lot, this only stops garbage from being chewed on
const MAX_TOKEN_LEN: usize = 16 * 1024;
const MAX_RECORD_LEN: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed reference token: {reason}")]
    Malformed { reason: &'static str },
}

impl DecodeError {
    fn malformed(reason: &'static str) -> Self {
        Self::Malformed { reason }
    }
}

/// upstream target plus everything needed to replay the request against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueReference {
    #[serde(rename = "u")]
    pub target_url: String,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    // btree so the serialized form (and therefore the token) doesn't depend on insert order
    #[serde(rename = "h", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
}

impl OpaqueReference {
    pub fn new(
        target_url: impl Into<String>,
        referer: Option<String>,
        extra_headers: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            referer,
            extra_headers: extra_headers.unwrap_or_default(),
        }
    }

    /// same referer and headers, different target. used for everything a playlist points at
    pub fn child(&self, target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            referer: self.referer.clone(),
            extra_headers: self.extra_headers.clone(),
        }
    }

    /// full header set for the upstream request, referer included
    pub fn request_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.extra_headers.clone();
        if let Some(referer) = &self.referer {
            headers.insert("Referer".to_string(), referer.clone());
        }
        headers
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("reference record always serializes");

        let mut encoder = DeflateEncoder::new(vec![TOKEN_VERSION], Compression::best());
        encoder
            .write_all(&json)
            .expect("writing into a Vec cannot fail");
        let mut payload = encoder.finish().expect("writing into a Vec cannot fail");

        let digest = checksum(&payload);
        payload.extend_from_slice(&digest);

        URL_SAFE_NO_PAD.encode(payload)
    }

    /// the same checks `decode` runs, for references built from outside input
    pub fn validate(self) -> Result<Self, DecodeError> {
        if !is_absolute_http(&self.target_url) {
            return Err(DecodeError::malformed("target is not an absolute http(s) url"));
        }

        if let Some(referer) = &self.referer {
            if !is_absolute_http(referer) {
                return Err(DecodeError::malformed("referer is not an absolute http(s) url"));
            }
        }

        // these get replayed as real headers later, refuse anything reqwest would choke on
        for (name, value) in &self.extra_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(DecodeError::malformed("invalid header in reference"));
            }
        }

        Ok(self)
    }
}

pub fn encode(
    target_url: &str,
    referer: Option<&str>,
    extra_headers: Option<&BTreeMap<String, String>>,
) -> String {
    OpaqueReference::new(
        target_url,
        referer.map(str::to_string),
        extra_headers.cloned(),
    )
    .encode()
}

pub fn decode(token: &str) -> Result<OpaqueReference, DecodeError> {
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return Err(DecodeError::malformed("token length out of bounds"));
    }

    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| DecodeError::malformed("not base64url"))?;

    if raw.len() <= 1 + DIGEST_LEN {
        return Err(DecodeError::malformed("token too short"));
    }

    let (payload, digest) = raw.split_at(raw.len() - DIGEST_LEN);
    if payload[0] != TOKEN_VERSION {
        return Err(DecodeError::malformed("unknown token version"));
    }
    if checksum(payload).as_slice() != digest {
        return Err(DecodeError::malformed("integrity check failed"));
    }

    let mut json = Vec::new();
    DeflateDecoder::new(&payload[1..])
        .take(MAX_RECORD_LEN + 1)
        .read_to_end(&mut json)
        .map_err(|_| DecodeError::malformed("corrupt record"))?;
    if json.len() as u64 > MAX_RECORD_LEN {
        return Err(DecodeError::malformed("record too large"));
    }

    let reference: OpaqueReference =
        serde_json::from_slice(&json).map_err(|_| DecodeError::malformed("invalid record"))?;

    reference.validate()
}

/// older players still hold urls in the `url=<base64>&ref=<base64>` shape, and some callers pass
/// a plain url. `url_param` is expected already query-decoded. both end up as a regular
/// reference without extra headers
pub fn decode_legacy(url_param: &str, ref_param: Option<&str>) -> Result<OpaqueReference, DecodeError> {
    let target_url = decode_legacy_part(url_param)?;
    let referer = ref_param
        .filter(|r| !r.is_empty())
        .map(decode_legacy_part)
        .transpose()?;

    debug!("decoded legacy reference for {}", target_url);

    OpaqueReference::new(target_url, referer, None).validate()
}

fn decode_legacy_part(param: &str) -> Result<String, DecodeError> {
    // the query extractor already percent-decoded this once, anything still escaped belongs to
    // the target (signed cdn paths love %2F and %3D)
    if param.starts_with("http://") || param.starts_with("https://") {
        return Ok(param.to_string());
    }

    if param.len() > MAX_TOKEN_LEN {
        return Err(DecodeError::malformed("token length out of bounds"));
    }

    // legacy links were produced with the padding stripped
    let mut padded = param.to_string();
    while !padded.len().is_multiple_of(4) {
        padded.push('=');
    }

    let bytes = URL_SAFE
        .decode(&padded)
        .map_err(|_| DecodeError::malformed("not base64url"))?;
    String::from_utf8(bytes).map_err(|_| DecodeError::malformed("not utf-8"))
}

fn checksum(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&digest[..DIGEST_LEN]);
    out
}

fn is_absolute_http(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

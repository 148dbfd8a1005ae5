use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};

/// what we ask upstream for when we have to read the body ourselves (playlists)
pub const UPSTREAM_ACCEPT_ENCODING: &str = "gzip, zstd";

/// Supported compression encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Zstd,
    Gzip,
    None,
}

impl ContentEncoding {
    /// pick an encoding from the client's Accept-Encoding. apple's player sends
    /// "gzip, deflate" or "identity" and won't touch zstd, so order of preference is
    /// zstd > gzip > nothing, and anything with q=0 is treated as refused
    pub fn from_accept_encoding(accept_encoding: Option<&str>) -> Self {
        let Some(value) = accept_encoding else {
            return Self::None;
        };

        let accepted: Vec<&str> = value
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.split(';').map(str::trim);
                let coding = pieces.next()?;
                let refused = pieces.any(|p| {
                    p.strip_prefix("q=")
                        .and_then(|q| q.parse::<f32>().ok())
                        .is_some_and(|q| q <= 0.0)
                });
                (!coding.is_empty() && !refused).then_some(coding)
            })
            .collect();

        if accepted.iter().any(|c| c.eq_ignore_ascii_case("zstd")) {
            Self::Zstd
        } else if accepted.iter().any(|c| c.eq_ignore_ascii_case("gzip")) {
            Self::Gzip
        } else {
            Self::None
        }
    }

    /// upstream Content-Encoding, errors on anything we can't decode ourselves
    pub fn from_content_encoding(content_encoding: Option<&str>) -> Result<Self, String> {
        match content_encoding.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("identity") => Ok(Self::None),
            Some("gzip") | Some("x-gzip") => Ok(Self::Gzip),
            Some("zstd") => Ok(Self::Zstd),
            Some(other) => Err(format!("unsupported upstream content encoding: {}", other)),
        }
    }

    pub fn as_header_value(&self) -> Option<&'static str> {
        match self {
            Self::Zstd => Some("zstd"),
            Self::Gzip => Some("gzip"),
            Self::None => None,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        match self {
            Self::Zstd => zstd::encode_all(data, 3),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::None => Ok(data.to_vec()),
        }
    }

    /// decodes at most `limit` bytes. a tiny gzip bomb still only costs us `limit`
    pub fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, std::io::Error> {
        let reader: Box<dyn Read + '_> = match self {
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(data)?),
            Self::Gzip => Box::new(GzDecoder::new(data)),
            Self::None => Box::new(data),
        };

        let mut out = Vec::new();
        reader.take(limit as u64 + 1).read_to_end(&mut out)?;

        if out.len() > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("decoded body exceeds {} bytes", limit),
            ));
        }

        Ok(out)
    }
}

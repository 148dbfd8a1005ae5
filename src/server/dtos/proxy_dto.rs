use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::server::utils::{DecodeError, OpaqueReference, reference_codec};

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_reference_shape"))]
pub struct ProxyQuery {
    #[validate(length(min = 1, max = 16384))]
    pub token: Option<String>,
    /// legacy `url=&ref=` links
    #[validate(length(min = 1, max = 16384))]
    pub url: Option<String>,
    #[serde(rename = "ref")]
    pub referer: Option<String>,
}

fn validate_reference_shape(query: &ProxyQuery) -> Result<(), ValidationError> {
    if query.token.is_none() && query.url.is_none() {
        let mut err = ValidationError::new("missing_reference");
        err.message = Some("either token or url is required".into());
        return Err(err);
    }
    Ok(())
}

impl ProxyQuery {
    /// the token wins if a link somehow carries both shapes
    pub fn reference(&self) -> Result<OpaqueReference, DecodeError> {
        match (&self.token, &self.url) {
            (Some(token), _) => reference_codec::decode(token),
            (None, Some(url)) => reference_codec::decode_legacy(url, self.referer.as_deref()),
            (None, None) => Err(DecodeError::Malformed {
                reason: "missing reference",
            }),
        }
    }
}

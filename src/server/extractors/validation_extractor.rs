use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::server::error::Error;

/// query string that went through serde and then the validator rules
pub struct ValidatedQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value): Query<T> = Query::from_request_parts(parts, state)
            .await
            .map_err(|err| Error::BadRequest(err.body_text()))?;

        value.validate()?;

        Ok(ValidatedQuery(value))
    }
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use validator::ValidationErrors;

use crate::server::{
    services::{fetch_services::FetchError, stream_services::ResolutionError},
    utils::{DecodeError, RewriteError},
};

pub type AppResult<T> = Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    RangeNotSatisfiable(String),
    #[error("unexpected error occurred")]
    InternalServerError,
    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::InternalServerError | Self::InternalServerErrorWithContext(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        } else {
            warn!("request refused with {}: {}", status, self);
        }

        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        match err {
            // expired links usually come back as 404/410, tell the player the same thing
            FetchError::UpstreamRejected { status: 404 | 410 } => Self::NotFound(err.to_string()),
            FetchError::UpstreamRejected { status: 416 } => Self::RangeNotSatisfiable(err.to_string()),
            FetchError::InvalidRequest(_) => Self::BadRequest(err.to_string()),
            _ => Self::BadGateway(err.to_string()),
        }
    }
}

impl From<RewriteError> for Error {
    fn from(err: RewriteError) -> Self {
        Self::BadGateway(err.to_string())
    }
}

impl From<ResolutionError> for Error {
    fn from(err: ResolutionError) -> Self {
        match err {
            ResolutionError::NoServersAvailable { .. } => Self::NotFound(err.to_string()),
            ResolutionError::UpstreamExtractionFailed(_) => Self::BadGateway(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(err: ValidationErrors) -> Self {
        Self::BadRequest(err.to_string().replace('\n', ", "))
    }
}

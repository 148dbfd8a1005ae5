use axum::{Json, Router, extract::Path, routing::get};
use tracing::debug;

use crate::server::{
    dtos::stream_dto::{ApiResponse, StreamBundle, StreamQuery},
    error::{AppResult, Error},
    extractors::{EdgeClient, ValidatedQuery},
};

const MAX_EPISODE_ID_LEN: usize = 256;

pub struct StreamController;

impl StreamController {
    pub fn app() -> Router {
        Router::new().route("/{episode_id}", get(Self::resolve_stream))
    }

    async fn resolve_stream(
        EdgeClient(client_id, services): EdgeClient,
        Path(episode_id): Path<String>,
        ValidatedQuery(params): ValidatedQuery<StreamQuery>,
    ) -> AppResult<Json<ApiResponse<StreamBundle>>> {
        let episode_id = episode_id.trim();
        if episode_id.is_empty() || episode_id.len() > MAX_EPISODE_ID_LEN {
            return Err(Error::BadRequest("invalid episode id".to_string()));
        }

        let selection = params.selection();
        debug!(
            "client {} resolving {} on {}/{}",
            client_id, episode_id, selection.server, selection.category
        );

        let bundle = services.streams.resolve(episode_id, &selection).await?;

        Ok(Json(ApiResponse::ok(bundle)))
    }
}

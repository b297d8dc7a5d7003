use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::database::{EntityKind, GpssPokemon, Search};
use crate::ServiceState;

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub download: bool,
}

/// Fetch a stored record by its public code. The download counter is
/// bumped on every hit, even with `download=false` (a counter-only ping)
/// and even when the response is served from cache.
pub async fn handler(
    State(state): State<ServiceState>,
    Path((entity_type, code)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, DownloadError> {
    let kind = EntityKind::parse(&entity_type).ok_or(DownloadError::InvalidEntityType)?;

    match kind {
        EntityKind::Pokemon => state.database().increment_pokemon_download(&code).await?,
        EntityKind::Bundle => state.database().increment_bundle_download(&code).await?,
    }

    if !query.download {
        return Ok(http::StatusCode::OK.into_response());
    }

    let cache_key = ResponseCache::download_key(kind, &code, query.download);
    if let Some(cached) = state.cache().get_download(&cache_key) {
        tracing::debug!(code, "download served from cache");
        return Ok(Json(cached.as_ref().clone()).into_response());
    }

    let search = Search::by_code(&code);
    let record = match kind {
        EntityKind::Pokemon => state
            .database()
            .list_pokemons(1, 1, &search)
            .await?
            .into_iter()
            .next()
            .map(|p| serde_json::to_value(GpssPokemon::from(p))),
        EntityKind::Bundle => state
            .database()
            .list_bundles(1, 1, &search)
            .await?
            .into_iter()
            .next()
            .map(serde_json::to_value),
    };

    let record = match record {
        Some(Ok(value)) => value,
        Some(Err(err)) => {
            tracing::error!(code, "failed to serialize stored record: {err}");
            return Err(DownloadError::NotFound(kind));
        }
        None => return Err(DownloadError::NotFound(kind)),
    };

    state
        .cache()
        .put_download(cache_key, Arc::new(record.clone()));
    Ok(Json(record).into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid entity type")]
    InvalidEntityType,
    #[error("no record under that code")]
    NotFound(EntityKind),
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for DownloadError {
    fn into_response(self) -> Response {
        match self {
            DownloadError::InvalidEntityType => (
                http::StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid entity type"})),
            )
                .into_response(),
            DownloadError::NotFound(kind) => (
                http::StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": format!("{} not found", kind.cache_ns())})),
            )
                .into_response(),
            DownloadError::Database(err) => {
                tracing::error!("database failure during download: {err}");
                (
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

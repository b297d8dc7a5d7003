use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::database::{content_hash, EntityKind};
use crate::search::{self, SearchBody};
use crate::ServiceState;

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub amount: Option<u32>,
}

pub async fn handler(
    State(state): State<ServiceState>,
    Path(entity_type): Path<String>,
    Query(pagination): Query<Pagination>,
    body: Option<Json<SearchBody>>,
) -> Result<Response, SearchError> {
    let kind = EntityKind::parse(&entity_type).ok_or(SearchError::InvalidEntityType)?;

    let page = pagination.page.unwrap_or(1).max(1);
    let amount = pagination.amount.unwrap_or(30).max(1);
    let body = body.map(|Json(body)| body).unwrap_or_default();

    // The raw path segment is part of the key: the response echoes it back
    // as the items field, so `bundle` and `bundles` cache separately.
    let body_json = serde_json::to_string(&body).unwrap_or_default();
    let digest = content_hash(&format!("{entity_type}:{body_json}"));
    let cache_key = ResponseCache::search_key(kind, page, amount, &digest);

    if let Some(cached) = state.cache().get_search(&cache_key) {
        tracing::debug!(%entity_type, page, amount, "search served from cache");
        return Ok(Json(cached.as_ref().clone()).into_response());
    }

    let results = search::execute(state.database(), kind, page, amount, &body.translate()).await?;

    let mut response = serde_json::Map::new();
    response.insert("page".into(), results.page.into());
    response.insert("pages".into(), results.pages.into());
    response.insert("total".into(), results.total.into());
    response.insert(entity_type, results.items);
    let response = Value::Object(response);

    state
        .cache()
        .put_search(cache_key, Arc::new(response.clone()));
    Ok(Json(response).into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid entity type")]
    InvalidEntityType,
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        match self {
            SearchError::InvalidEntityType => (
                http::StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid entity type"})),
            )
                .into_response(),
            SearchError::Database(err) => {
                tracing::error!("search failed: {err}");
                (
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

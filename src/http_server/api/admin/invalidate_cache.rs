use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::database::EntityKind;
use crate::ServiceState;

/// Manual coarse invalidation of the search cache for one kind.
pub async fn handler(
    State(state): State<ServiceState>,
    Path(entity_type): Path<String>,
) -> Response {
    let Some(kind) = EntityKind::parse(&entity_type) else {
        return (
            http::StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid entity type"})),
        )
            .into_response();
    };

    state.cache().invalidate_search(kind);
    tracing::info!(%entity_type, "search cache invalidated by admin");
    http::StatusCode::ACCEPTED.into_response()
}

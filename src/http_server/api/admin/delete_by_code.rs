use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::database::EntityKind;
use crate::ServiceState;

pub async fn handler(
    State(state): State<ServiceState>,
    Path((entity_type, code)): Path<(String, String)>,
) -> Result<Response, DeleteError> {
    let kind = EntityKind::parse(&entity_type).ok_or(DeleteError::InvalidEntityType)?;

    let deleted = match kind {
        EntityKind::Pokemon => state.database().delete_pokemon_by_code(&code).await?,
        EntityKind::Bundle => state.database().delete_bundle_by_code(&code).await?,
    };

    if deleted {
        tracing::info!(%entity_type, code, "record deleted by admin");
        Ok(http::StatusCode::ACCEPTED.into_response())
    } else {
        Err(DeleteError::NotFound { entity_type, code })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("invalid entity type")]
    InvalidEntityType,
    #[error("no record under that code")]
    NotFound { entity_type: String, code: String },
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for DeleteError {
    fn into_response(self) -> Response {
        match self {
            DeleteError::InvalidEntityType => (
                http::StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid entity type"})),
            )
                .into_response(),
            DeleteError::NotFound { entity_type, code } => (
                http::StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": format!("{entity_type} with code '{code}' not found")
                })),
            )
                .into_response(),
            DeleteError::Database(err) => {
                tracing::error!("database failure during delete: {err}");
                (
                    http::StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

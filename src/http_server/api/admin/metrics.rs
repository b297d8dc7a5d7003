use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::database::Search;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub pokemons: i64,
    pub bundles: i64,
}

pub async fn handler(State(state): State<ServiceState>) -> Result<Response, MetricsError> {
    let unfiltered = Search::default();
    let response = MetricsResponse {
        pokemons: state.database().count_pokemons(&unfiltered).await?,
        bundles: state.database().count_bundles(&unfiltered).await?,
    };
    Ok(Json(response).into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        let MetricsError::Database(err) = self;
        tracing::error!("database failure during metrics: {err}");
        (
            http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "internal server error"})),
        )
            .into_response()
    }
}

//! Thin pass-throughs to the oracle's legality analysis and auto-fix,
//! cached by file content so repeat checks of the same record are free.

use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

pub mod legality;
pub mod legalize;

use crate::oracle::OracleError;
use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/legality", post(legality::handler))
        .route("/legalize", post(legalize::handler))
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum PksmError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("multipart error: {0}")]
    Multipart(String),
    #[error("oracle failure: {0}")]
    Oracle(#[from] OracleError),
}

impl IntoResponse for PksmError {
    fn into_response(self) -> Response {
        match self {
            PksmError::BadRequest(msg) | PksmError::Multipart(msg) => (
                http::StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": msg})),
            )
                .into_response(),
            PksmError::Oracle(err) => {
                tracing::error!("oracle failure during legality check: {err}");
                (
                    http::StatusCode::BAD_GATEWAY,
                    Json(serde_json::json!({"error": "record oracle is unavailable"})),
                )
                    .into_response()
            }
        }
    }
}

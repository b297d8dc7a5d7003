use axum::routing::{get, post};
use axum::Router;

pub mod download;
pub mod search;
pub mod upload;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/search/:entity_type", post(search::handler))
        .route("/upload/:entity_type", post(upload::handler))
        .route("/download/:entity_type/:code", get(download::handler))
        .with_state(state)
}

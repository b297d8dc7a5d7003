use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::time::timeout;

use crate::ServiceState;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Readiness is a live round-trip to the database, nothing more.
pub async fn handler(State(state): State<ServiceState>) -> Response {
    let probe = sqlx::query("SELECT 1").execute(&**state.database());

    match timeout(HEALTH_CHECK_TIMEOUT, probe).await {
        Ok(Ok(_)) => {
            let msg = serde_json::json!({"status": "ok"});
            (StatusCode::OK, Json(msg)).into_response()
        }
        Ok(Err(e)) => {
            tracing::error!("readiness probe failed: {e}");
            let msg = serde_json::json!({
                "status": "failure",
                "message": "database is not available"
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(msg)).into_response()
        }
        Err(_) => {
            let msg = serde_json::json!({
                "status": "failure",
                "message": "health check timed out"
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(msg)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testkit::{mock_state, MockOracle};

    #[tokio::test]
    async fn ready_when_database_answers() {
        let state = mock_state(Arc::new(MockOracle::default())).await;
        let response = handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

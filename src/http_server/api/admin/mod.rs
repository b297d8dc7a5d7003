use axum::routing::{delete, get, post};
use axum::Router;

pub mod delete_by_code;
pub mod invalidate_cache;
pub mod metrics;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/:entity_type/:code", delete(delete_by_code::handler))
        .route(
            "/cache/invalidate/:entity_type",
            post(invalidate_cache::handler),
        )
        .route("/metrics", get(metrics::handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::Router;
    use http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::database::Search;
    use crate::testkit::{mock_state, MockOracle};
    use crate::ServiceState;

    fn test_router(state: ServiceState) -> Router {
        Router::new()
            .nest("/api/v2/admin", super::router(state.clone()))
            .with_state(state)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        serde_json::from_slice(&bytes).expect("body is json")
    }

    #[tokio::test]
    async fn delete_by_code_roundtrip() {
        let state = mock_state(Arc::new(MockOracle::default())).await;
        state
            .database()
            .insert_pokemon("payload", true, "1234567890", "7")
            .await
            .unwrap();
        let router = test_router(state.clone());

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v2/admin/pokemon/1234567890")
            .body(Body::empty())
            .expect("request builds");
        let response = router.clone().oneshot(request).await.expect("request runs");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            state.database().count_pokemons(&Search::default()).await.unwrap(),
            0
        );

        // gone now
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v2/admin/pokemon/1234567890")
            .body(Body::empty())
            .expect("request builds");
        let response = router.oneshot(request).await.expect("request runs");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cache_invalidation_accepts_known_kinds() {
        let state = mock_state(Arc::new(MockOracle::default())).await;
        let router = test_router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v2/admin/cache/invalidate/bundles")
            .body(Body::empty())
            .expect("request builds");
        let response = router.clone().oneshot(request).await.expect("request runs");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v2/admin/cache/invalidate/trainers")
            .body(Body::empty())
            .expect("request builds");
        let response = router.oneshot(request).await.expect("request runs");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_report_both_counts() {
        let state = mock_state(Arc::new(MockOracle::default())).await;
        let id = state
            .database()
            .insert_pokemon("payload", true, "1234567890", "7")
            .await
            .unwrap();
        let other = state
            .database()
            .insert_pokemon("other", true, "0987654321", "7")
            .await
            .unwrap();
        state
            .database()
            .insert_bundle(true, "1111111111", "7", "7", &[id, other])
            .await
            .unwrap();
        let router = test_router(state);

        let request = Request::builder()
            .uri("/api/v2/admin/metrics")
            .body(Body::empty())
            .expect("request builds");
        let response = router.oneshot(request).await.expect("request runs");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["pokemons"], 2);
        assert_eq!(body["bundles"], 1);
    }
}

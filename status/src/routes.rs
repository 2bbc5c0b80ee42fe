//! HTTP read surface (§6): `/health`, `/status/:id`, `/status?ids=a,b,c`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::service::StatusReadService;

pub fn router(service: Arc<StatusReadService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status/:id", get(get_one))
        .route("/status", get(get_many))
        .with_state(service)
}

async fn health() -> impl IntoResponse {
    Json(json!({"ok": true, "service": "uptime-keeper-status", "cron": "*/15 * * * *"}))
}

async fn get_one(
    State(service): State<Arc<StatusReadService>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Ok(id) = id.parse::<i64>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_id"})),
        )
            .into_response();
    };
    let refresh = params.get("refresh").map(|v| v == "1").unwrap_or(false);
    let projection = service.get_status(id, refresh).await;
    Json(projection).into_response()
}

async fn get_many(
    State(service): State<Arc<StatusReadService>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(raw_ids) = params.get("ids") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing_ids"})),
        )
            .into_response();
    };

    let parsed: Result<Vec<i64>, _> = raw_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>())
        .collect();

    let ids = match parsed {
        Ok(ids) if !ids.is_empty() => ids,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_ids"})),
            )
                .into_response()
        }
    };

    let results = service.get_status_many(&ids).await;
    Json(results).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use uptimekeeper_adapters::registry::AdapterRegistry;
    use uptimekeeper_core::MinerRecord;
    use uptimekeeper_persistence::PersistenceError;

    struct EmptyPersistence;

    #[async_trait]
    impl uptimekeeper_persistence::PersistenceAdapter for EmptyPersistence {
        async fn select_candidates(
            &self,
            _pool: &str,
        ) -> Result<Vec<MinerRecord>, PersistenceError> {
            Ok(vec![])
        }
        async fn increment_hours(&self, _ids: &[i64]) -> Result<u64, PersistenceError> {
            Ok(0)
        }
        async fn set_status(
            &self,
            _ids: &[i64],
            _new_status: &str,
        ) -> Result<Vec<i64>, PersistenceError> {
            Ok(vec![])
        }
        async fn get_miner(&self, _id: i64) -> Result<Option<MinerRecord>, PersistenceError> {
            Ok(None)
        }
    }

    fn test_router() -> Router {
        let service = Arc::new(StatusReadService::new(
            Arc::new(EmptyPersistence),
            Arc::new(AdapterRegistry::new(None)),
        ));
        router(service)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_ids_query_is_bad_request() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/status?ids=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_miner_falls_back_to_offline_not_found() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/status/99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_single_id_is_bad_request() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/status/not-a-number")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

// crates/server/src/routes/jobs.rs
//! API routes for the job registry.
//!
//! - GET /jobs - Running jobs grouped by operation
//! - GET /jobs/{op} - Running jobs of one operation
//! - POST /jobs/{op}/cancel - Cancel jobs by cache key

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use toolbox_core::JobSnapshot;

use crate::routes::ActingUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelResponse {
    pub cancelled: usize,
}

/// GET /api/jobs
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, Vec<JobSnapshot>>> {
    Json(state.context.registry().list_all())
}

/// GET /api/jobs/{op}
async fn list_op(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
) -> Json<Vec<JobSnapshot>> {
    Json(state.context.registry().list_by(&op))
}

/// POST /api/jobs/{op}/cancel - unknown keys are ignored, so this never fails.
async fn cancel_jobs(
    State(state): State<Arc<AppState>>,
    ActingUser(user): ActingUser,
    Path(op): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Json<CancelResponse> {
    let cancelled = state.context.registry().cancel(&op, &req.keys);
    tracing::info!(user = %user, op = %op, keys = ?req.keys, cancelled, "Cancel requested");
    Json(CancelResponse { cancelled })
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{op}", get(list_op))
        .route("/jobs/{op}/cancel", post(cancel_jobs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::routes::USER_HEADER;
    use crate::state::AppConfig;

    #[tokio::test]
    async fn test_list_jobs_empty() {
        let state = AppState::new(AppConfig::default());
        let app = router().with_state(state);

        let response = app
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_cancel_registered_job() {
        let state = AppState::new(AppConfig::default());
        let handle = state.context.job_handle();
        state
            .context
            .registry()
            .register("dbExport", "cacheA", handle.clone())
            .unwrap();
        let app = router().with_state(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs/dbExport/cancel")
                    .header(USER_HEADER, "alice")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"keys":["cacheA","missing"]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: CancelResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.cancelled, 1);
        assert!(handle.is_cancelled());
        assert!(state.context.registry().list_by("dbExport").is_empty());
    }

    #[tokio::test]
    async fn test_cancel_requires_user() {
        let app = router().with_state(AppState::new(AppConfig::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs/dbExport/cancel")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"keys":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

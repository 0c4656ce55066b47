//! API route handlers for the toolbox server.

pub mod jobs;
pub mod notice;
pub mod status;
pub mod transfers;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::Router;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the acting user. Authentication happens upstream.
pub const USER_HEADER: &str = "x-toolbox-user";

/// The user a request acts for, taken from [`USER_HEADER`].
#[derive(Debug, Clone)]
pub struct ActingUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| ActingUser(v.to_string()))
            .ok_or_else(|| ApiError::Unauthorized(format!("{USER_HEADER} header is required")))
    }
}

/// Create the combined API router.
///
/// Routes:
/// - GET  /api/health - Job and client counts
/// - GET  /api/jobs - Running jobs grouped by operation
/// - GET  /api/jobs/{op} - Running jobs of one operation
/// - POST /api/jobs/{op}/cancel - Cancel jobs by key
/// - GET  /api/notice/stream - SSE stream of notices for one client
/// - POST /api/notice/types - Open/close message types
/// - POST /api/transfers - Start a file transfer job
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", status::router())
        .nest("/api", jobs::router())
        .nest("/api", notice::router())
        .nest("/api", transfers::router())
        .merge(status::scrape_router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppConfig;

    #[test]
    fn test_api_routes_creation() {
        let state = AppState::new(AppConfig::default());
        let _router = api_routes(state);
    }
}

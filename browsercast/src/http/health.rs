//! Health and status endpoints

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use browsercast_browser::BrowserStatus;
use browsercast_stream::{BroadcasterStats, SessionInfo};
use serde::Serialize;

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub browser: BrowserStatus,
    pub broadcaster: BroadcasterStats,
    pub sessions: Vec<SessionInfo>,
}

/// Browser state, fan-out counters and active WebRTC sessions
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        browser: state.browser.status(),
        broadcaster: state.broadcaster.stats(),
        sessions: state.sessions.sessions(),
    })
}

#[cfg(test)]
mod tests {
    use crate::http::{create_router, test_support};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_support::state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_status_reports_idle_system() {
        let state = test_support::state();
        let _listener = state.broadcaster.register();
        let app = create_router(state);
        let req = Request::builder().uri("/status").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["browser"]["running"], false);
        assert_eq!(json["broadcaster"]["listeners"], 1);
        assert_eq!(json["sessions"], serde_json::json!([]));
    }
}

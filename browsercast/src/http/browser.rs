//! Browser control endpoints
//!
//! - `POST /start` - launch the browser (no-op when running)
//! - `POST /stop` - stop the browser (no-op when stopped)
//! - `POST /navigate` - open a URL in the running browser

use axum::{body::Bytes, extract::State, Json};
use browsercast_stream::InputAction;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
pub struct StatusReply {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn start_browser(State(state): State<AppState>) -> AppResult<Json<StatusReply>> {
    if state.browser.start().await? {
        info!("Browser started on request");
    }
    Ok(Json(StatusReply { status: "started" }))
}

pub async fn stop_browser(State(state): State<AppState>) -> Json<StatusReply> {
    if state.browser.stop().await {
        info!("Browser stopped on request");
    }
    Json(StatusReply { status: "stopped" })
}

/// Body parsed by hand so malformed JSON gets the same `{error, status}` shape
/// as every other failure
pub async fn navigate(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<StatusReply>> {
    let req: NavigateRequest = serde_json::from_slice(&body)?;
    let url = req
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("url is required"))?;

    state
        .browser
        .apply(&InputAction::Navigate { url })
        .await?;
    Ok(Json(StatusReply { status: "navigated" }))
}

#[cfg(test)]
mod tests {
    use crate::http::{create_router, test_support};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let app = create_router(test_support::state());

        for _ in 0..2 {
            let resp = app.clone().oneshot(post("/stop", "")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
            assert_eq!(&body[..], br#"{"status":"stopped"}"#);
        }
    }

    #[tokio::test]
    async fn test_navigate_requires_url() {
        let app = create_router(test_support::state());

        let resp = app.oneshot(post("/navigate", r#"{"url":"  "}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_navigate_rejects_malformed_json() {
        let app = create_router(test_support::state());

        let resp = app.oneshot(post("/navigate", "{url:")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 400);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_navigate_without_browser() {
        let app = create_router(test_support::state());

        let resp = app
            .oneshot(post("/navigate", r#"{"url":"example.com"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}

//! WebRTC viewer endpoints
//!
//! - `POST /offer` - negotiate a new viewer session
//! - `GET /sessions` - list active sessions
//! - `DELETE /sessions/{session_id}` - close a session

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use browsercast_stream::{SessionDescription, SessionId, SessionInfo};
use serde::{Deserialize, Serialize};

use crate::http::{AppResult, AppState};

/// Answer returned to the viewer
///
/// # Response
/// ```json
/// { "sdp": "v=0...", "type": "answer", "sessionId": "V1StGXR8_Z5j" }
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub session_id: SessionId,
}

/// Accept an SDP offer `{"sdp": "...", "type": "offer"}`
pub async fn offer(
    State(state): State<AppState>,
    Json(offer): Json<SessionDescription>,
) -> AppResult<Json<OfferResponse>> {
    let negotiated = state.sessions.handle_offer(offer).await?;

    Ok(Json(OfferResponse {
        sdp: negotiated.answer.sdp,
        sdp_type: negotiated.answer.sdp_type,
        session_id: negotiated.session_id,
    }))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.sessions())
}

pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<StatusCode> {
    state.sessions.close_session(&SessionId::new(session_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::http::{create_router, test_support};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    fn post_offer(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/offer")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_offer_with_wrong_type_is_rejected() {
        let app = create_router(test_support::state());

        let resp = app
            .oneshot(post_offer(r#"{"sdp":"v=0\r\n","type":"answer"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], 400);
    }

    #[tokio::test]
    async fn test_offer_with_garbage_sdp_is_rejected() {
        let state = test_support::state();
        let broadcaster = state.broadcaster.clone();
        let app = create_router(state);

        let resp = app
            .oneshot(post_offer(r#"{"sdp":"not sdp","type":"offer"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_close_unknown_session() {
        let app = create_router(test_support::state());
        let req = Request::builder()
            .method(Method::DELETE)
            .uri("/sessions/missing")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let app = create_router(test_support::state());
        let req = Request::builder().uri("/sessions").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert_eq!(&body[..], b"[]");
    }
}

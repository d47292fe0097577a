//! HTTP routes

mod tts;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/tts", post(tts::synthesize))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sample_rate": state.config.sample_rate,
        "requests_served": state.requests_served(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use cosyvoice_core::ServerConfig;
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(AppState::new(ServerConfig {
            chunk_interval_ms: 0,
            ..ServerConfig::default()
        }))
    }

    fn form_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/tts")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["sample_rate"], 24000);
    }

    #[tokio::test]
    async fn test_tts_streams_pcm() {
        // "hello" with person=mom
        let response = router()
            .oneshot(form_request("tts_text=hello&person=mom"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert!(response.headers().contains_key("x-request-id"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        // 5 characters at 120 ms of 24 kHz 16-bit audio
        assert_eq!(body.len(), 28800);
    }

    #[tokio::test]
    async fn test_tts_accepts_utf8_text() {
        let response = router()
            .oneshot(form_request("tts_text=%EC%95%88%EB%85%95&person=grandma"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 11520);
    }

    #[tokio::test]
    async fn test_tts_rejects_empty_text() {
        let response = router()
            .oneshot(form_request("tts_text=&person=mom"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], 400);
    }

    #[tokio::test]
    async fn test_tts_rejects_missing_speaker() {
        let response = router()
            .oneshot(form_request("tts_text=hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

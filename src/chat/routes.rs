//! HTTP surface: liveness endpoints and `POST /chat`.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::SecretString;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use super::auth::require_bearer;
use super::service::{ChatRequest, ChatService};
use crate::error::Error;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub api_token: SecretString,
}

/// Build the Axum router.
pub fn chat_routes(chat: ChatService, api_token: SecretString) -> Router {
    let state = AppState { chat, api_token };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Liveness ────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Texet API is running.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.chat.store().ping().await {
        Ok(()) => "ok",
        Err(e) => {
            warn!(error = %e, "Health check: database unavailable");
            "unavailable"
        }
    };
    Json(serde_json::json!({
        "status": "ok",
        "database": database,
    }))
}

// ── Chat ────────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    if let Err(rejection) = require_bearer(&headers, &state.api_token) {
        return rejection.into_response();
    }

    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({"detail": rejection.body_text()})),
            )
                .into_response();
        }
    };

    match state.chat.handle(request).await {
        Ok(queued) => (StatusCode::ACCEPTED, Json(queued)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Maps crate errors onto HTTP statuses.
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            Error::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            e if e.is_not_found() => (StatusCode::NOT_FOUND, e.to_string()),
            e => {
                error!(category = e.category(), error = %e, "Chat request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({"detail": detail}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, header};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::MessageBounds;
    use crate::delivery::spawn_delivery_worker;
    use crate::delivery::test_support::{Harness, RecordingChannel};
    use crate::error::{DatabaseError, ValidationError};

    const TOKEN: &str = "test-token";

    fn app(h: &Harness, token: &str) -> Router {
        let orchestrator = h.orchestrator(Arc::new(RecordingChannel::default()));
        let (queue, _worker) = spawn_delivery_worker(Arc::new(orchestrator), 2);
        let service = ChatService::new(h.store.clone(), queue, MessageBounds::default());
        chat_routes(service, SecretString::from(token.to_string()))
    }

    fn post_chat(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post("/chat").header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_and_health() {
        let h = Harness::new().await;
        let app = app(&h, TOKEN);

        let resp = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["message"], "Texet API is running.");
        assert!(body["timestamp"].is_string());

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn chat_is_accepted() {
        let h = Harness::new().await;
        let resp = app(&h, TOKEN)
            .oneshot(post_chat(
                Some("Bearer test-token"),
                r#"{"user_id": "u1", "message": "hello"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "queued");
        assert_eq!(body["conversation_id"].as_str().unwrap().len(), 32);
        assert_eq!(body["reply_utterance_id"].as_str().unwrap().len(), 32);
        assert!(body.get("text").is_none());
    }

    #[tokio::test]
    async fn chat_requires_auth() {
        let h = Harness::new().await;
        let body = r#"{"user_id": "u1", "message": "hello"}"#;

        let resp = app(&h, TOKEN).oneshot(post_chat(None, body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let resp = app(&h, TOKEN)
            .oneshot(post_chat(Some("Bearer wrong"), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(&h, "")
            .oneshot(post_chat(Some("Bearer test-token"), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(resp).await["detail"], "API_TOKEN is not set.");
    }

    #[tokio::test]
    async fn malformed_payloads_are_unprocessable() {
        let h = Harness::new().await;
        let auth = Some("Bearer test-token");
        for body in [
            r#"{"user_id": "u1"}"#,
            r#"{"user_id": "u1", "message": "hi", "extra": true}"#,
            r#"{"user_id": "u1", "message": "   "}"#,
            "not json",
        ] {
            let resp = app(&h, TOKEN).oneshot(post_chat(auth, body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "{body}");
        }
    }

    #[tokio::test]
    async fn error_status_mapping() {
        let validation = ApiError(ValidationError::Missing { field: "message" }.into());
        assert_eq!(
            validation.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let missing = ApiError(DatabaseError::not_found("utterance", "x").into());
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let internal = ApiError(DatabaseError::Query("boom".into()).into());
        let resp = internal.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(resp).await["detail"], "Internal server error");
    }
}

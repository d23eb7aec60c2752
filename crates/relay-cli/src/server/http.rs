//! Request/response chat endpoint and health check.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::{ChatInput, RelayError};
use serde::Serialize;
use tracing::{debug, error};

use super::AppState;

/// Message returned for every upstream failure; details stay in the logs
pub const UPSTREAM_ERROR_MESSAGE: &str = "AI error";

#[derive(Serialize)]
pub struct ReplyBody {
    reply: String,
}

#[derive(Serialize)]
pub struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    status: &'static str,
    vector_store: bool,
}

/// Relay error rendered as a JSON response
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, self.0.to_string())
        } else {
            error!("Chat request failed: {}", self.0);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                UPSTREAM_ERROR_MESSAGE.to_string(),
            )
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// POST /chat
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatInput>, JsonRejection>,
) -> Result<Json<ReplyBody>, ApiError> {
    let Json(input) = payload.map_err(|e| {
        debug!("Rejected chat body: {}", e);
        RelayError::InvalidInput("Invalid JSON body".to_string())
    })?;

    let reply = state.orchestrator.reply(input).await?;
    Ok(Json(ReplyBody { reply }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let vector_store = state
        .orchestrator
        .memory()
        .health_check()
        .await
        .unwrap_or(false);

    Json(HealthBody {
        status: "ok",
        vector_store,
    })
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use relay_core::testing::{Script, ScriptedModel};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::server::router;
    use crate::server::test_support::harness;

    fn post_chat(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_returns_reply_and_persists_turns() {
        let h = harness(ScriptedModel::replying("Hi there"));
        let app = router(h.state.clone());

        let response = app
            .oneshot(post_chat(r#"{"message":"hello","anonymousId":"u1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, json!({"reply": "Hi there"}));
        assert_eq!(h.index.points().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_field_is_400_without_upstream_calls() {
        for body in [
            r#"{"message":"hello"}"#,
            r#"{"anonymousId":"u1"}"#,
            r#"{"message":"","anonymousId":"u1"}"#,
        ] {
            let h = harness(ScriptedModel::replying("unused"));
            let response = router(h.state.clone()).oneshot(post_chat(body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                read_json(response).await,
                json!({"error": "Missing message or anonymousId"})
            );
            assert!(h.embedder.calls().is_empty());
            assert!(h.index.searches().is_empty());
            assert!(h.model.prompts().is_empty());
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_400() {
        let h = harness(ScriptedModel::replying("unused"));
        let response = router(h.state.clone())
            .oneshot(post_chat("{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.embedder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_generic_500() {
        let h = harness(ScriptedModel::new(Script::Fail("cuda out of memory".into())));
        let response = router(h.state.clone())
            .oneshot(post_chat(r#"{"message":"hello","anonymousId":"u1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read_json(response).await, json!({"error": "AI error"}));
    }

    #[tokio::test]
    async fn test_health_reports_vector_store() {
        let h = harness(ScriptedModel::replying("unused"));
        let response = router(h.state.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            read_json(response).await,
            json!({"status": "ok", "vectorStore": true})
        );
    }
}

use std::sync::Arc;

use anyhow::Context;
use aquakeeper_core::telegram::Update;
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use crate::runtime::BotRuntime;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct AppState {
    runtime: Arc<BotRuntime>,
    secret: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

// --- Middleware ---

async fn require_secret(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected) = state.secret {
        let authorized = request
            .headers()
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|token| token == expected);

        if !authorized {
            warn!("rejected webhook call with missing or wrong secret");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing secret token".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

/// Telegram retries deliveries that do not get a 2xx, so every well-formed
/// update is acknowledged, even when it carries nothing for the bot.
async fn webhook(State(state): State<AppState>, Json(update): Json<Update>) -> Json<OkResponse> {
    state.runtime.process(&update).await;
    Json(OkResponse { ok: true })
}

async fn health() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_secret))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    runtime: Arc<BotRuntime>,
    port: u16,
    bind: &str,
    secret: Option<String>,
) -> anyhow::Result<()> {
    if secret.is_none() {
        warn!("webhook authentication disabled (--no-auth); anyone can post updates");
    }

    let app = build_router(AppState { runtime, secret });

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::testing::RecordingOutbound;
    use aquakeeper_core::service::AquaService;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const START: &str = r#"{"update_id": 1, "message": {"message_id": 3, "from": {"id": 42, "is_bot": false, "first_name": "Ann"}, "chat": {"id": 42, "type": "private"}, "text": "/start"}}"#;

    fn test_app(secret: Option<&str>) -> (Router, Arc<RecordingOutbound>) {
        let outbound = Arc::new(RecordingOutbound::default());
        let runtime = BotRuntime::new(AquaService::new_in_memory().unwrap(), outbound.clone());
        let state = AppState {
            runtime: Arc::new(runtime),
            secret: secret.map(str::to_string),
        };
        (build_router(state), outbound)
    }

    fn post_update(body: &str, secret: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::post("/webhook")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn webhook_missing_secret_returns_401() {
        let (app, outbound) = test_app(Some("s3cret"));

        let response = app.oneshot(post_update(START, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Invalid or missing secret token");
        assert!(outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn webhook_wrong_secret_returns_401() {
        let (app, _) = test_app(Some("s3cret"));

        let response = app
            .oneshot(post_update(START, Some("guess")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_with_secret_replies_ok() {
        let (app, outbound) = test_app(Some("s3cret"));

        let response = app
            .oneshot(post_update(START, Some("s3cret")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true}));

        let sent = outbound.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 42);
        assert!(sent[0].1.contains("/add_aq"));
    }

    #[tokio::test]
    async fn no_auth_mode_accepts_updates() {
        let (app, outbound) = test_app(None);

        let response = app.oneshot(post_update(START, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(outbound.sent().len(), 1);
    }

    #[tokio::test]
    async fn non_text_update_is_acknowledged() {
        let (app, outbound) = test_app(None);
        let sticker = r#"{"update_id": 2, "message": {"message_id": 4, "chat": {"id": 42}, "sticker": {"file_id": "x"}}}"#;

        let response = app.oneshot(post_update(sticker, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_update_is_rejected() {
        let (app, _) = test_app(None);

        let response = app
            .oneshot(post_update("{\"nope\": true}", None))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn health_skips_secret_check() {
        let (app, _) = test_app(Some("s3cret"));

        let response = app
            .oneshot(
                axum::http::Request::get("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let (app, _) = test_app(Some("s3cret"));

        let response = app.oneshot(post_update(START, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let (app, _) = test_app(None);

        let big_body = vec![0u8; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}

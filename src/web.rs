//! HTTP server: webhook, glossary admin/read APIs and health endpoints.
//!
//! # Endpoints
//!
//! - `POST /line/webhook` — Signature-verified LINE webhook; always
//!   acknowledges verified deliveries with 200 so LINE never retries a
//!   whole batch over one bad event.
//! - `GET /line/webhook` — 200 hint for the LINE console's Verify button.
//! - `POST /admin/glossary` — PIN-protected glossary CRUD
//!   (`upsert | delete | import | reset | list`).
//! - `GET /glossary` — Public glossary read, `?force=true` bypasses the
//!   cache and initializes an absent key.
//! - `GET /status` — Presence flags for required configuration. Never the
//!   values themselves.
//! - `GET /kv-ping` — KV round-trip probe with latency.
//! - `GET /health` — Plain liveness check.

use crate::config::Config;
use crate::glossary::{GlossaryEntry, GlossaryStore, ImportMode, RawGlossaryEntry};
use crate::kv::KvStore;
use crate::line::{self, WebhookPayload};
use crate::webhook::WebhookPipeline;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

/// Shared state for all route handlers.
pub struct AppState {
    pub config: Config,
    pub glossary: GlossaryStore,
    pub pipeline: WebhookPipeline,
    pub kv: Arc<dyn KvStore>,
}

/// Error body shared by all endpoints.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

/// Success body for glossary reads and mutations.
#[derive(Debug, Serialize)]
struct GlossaryResponse {
    ok: bool,
    count: usize,
    glossary: Vec<GlossaryEntry>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: message.into(),
        }),
    )
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    // The public read API is fetched from browser admin pages on other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/kv-ping", get(kv_ping))
        .route("/glossary", get(glossary_list))
        .route("/admin/glossary", post(glossary_admin))
        .route("/line/webhook", get(webhook_hint).post(webhook))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}

/// Reports which configuration is present, as booleans only.
async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let c = &state.config;
    Json(json!({
        "ok": true,
        "env": {
            "OPENAI_API_KEY": c.openai_api_key.is_some(),
            "OPENAI_MODEL": c.openai_model,
            "LINE_CHANNEL_SECRET": c.line_channel_secret.is_some(),
            "LINE_CHANNEL_ACCESS_TOKEN": c.line_channel_access_token.is_some(),
            "KV_REST_API_URL": c.kv_rest_api_url.is_some(),
            "KV_REST_API_TOKEN": c.kv_rest_api_token.is_some(),
            "ADMIN_PIN": c.admin_pin.is_some(),
            "FAMILY_GLOSSARY_KEY": !c.glossary_key.is_empty(),
            "FAMILY_GROUP_IDS_count": c.family_group_ids.len(),
        },
    }))
}

/// KV round-trip probe: writes a timestamped value and reads it back.
async fn kv_ping(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let started = std::time::Instant::now();
    let value = format!(
        "pong:{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    );

    state
        .kv
        .set_raw("__kv_ping__", &value)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;
    let read = state
        .kv
        .get_raw("__kv_ping__")
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;

    Ok(Json(json!({
        "ok": true,
        "ms": started.elapsed().as_millis() as u64,
        "wrote": value,
        "read": read,
    })))
}

/// Query parameters for the public glossary read.
#[derive(Debug, Deserialize)]
struct GlossaryQuery {
    #[serde(default)]
    force: bool,
}

/// Public glossary read. `force=true` bypasses the cache (and initializes
/// the KV key when absent).
async fn glossary_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GlossaryQuery>,
) -> Result<Json<GlossaryResponse>, ApiError> {
    let result = if query.force {
        state.glossary.load_force().await
    } else {
        state.glossary.load().await
    };

    match result {
        Ok(glossary) => Ok(Json(GlossaryResponse {
            ok: true,
            count: glossary.len(),
            glossary,
        })),
        Err(e) => {
            error!("Glossary read failed: {:#}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))
        }
    }
}

/// Request body for the admin endpoint.
#[derive(Debug, Deserialize)]
struct AdminRequest {
    #[serde(default)]
    action: String,

    #[serde(default)]
    entry: Option<RawGlossaryEntry>,

    #[serde(default)]
    items: Vec<RawGlossaryEntry>,

    #[serde(default)]
    mode: Option<String>,
}

/// PIN-protected glossary mutations.
async fn glossary_admin(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AdminRequest>,
) -> Result<Json<GlossaryResponse>, ApiError> {
    require_pin(&state.config, &headers)?;

    let upstream =
        |e: anyhow::Error| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e));

    let glossary = match request.action.as_str() {
        "list" => state.glossary.load_force().await.map_err(upstream)?,
        "reset" => {
            state.glossary.reset().await.map_err(upstream)?;
            Vec::new()
        }
        "upsert" => {
            let entry = request
                .entry
                .filter(|e| !e.zh.trim().is_empty())
                .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "zh required"))?;
            state.glossary.upsert(entry).await.map_err(upstream)?
        }
        "delete" => {
            let zh = request
                .entry
                .map(|e| e.zh.trim().to_string())
                .filter(|zh| !zh.is_empty())
                .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "zh required"))?;
            state.glossary.delete(&zh).await.map_err(upstream)?
        }
        "import" => {
            let mode = match request.mode.as_deref() {
                Some("replace") => ImportMode::Replace,
                _ => ImportMode::Append,
            };
            state
                .glossary
                .import(request.items, mode)
                .await
                .map_err(upstream)?
        }
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "Unknown action")),
    };

    Ok(Json(GlossaryResponse {
        ok: true,
        count: glossary.len(),
        glossary,
    }))
}

/// Compares the x-admin-pin header against the configured PIN.
/// The error never says which part of the credential was wrong.
fn require_pin(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = config.admin_pin.as_deref() else {
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ADMIN_PIN not set",
        ));
    };

    let provided = headers
        .get("x-admin-pin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    Ok(())
}

/// LINE's console pokes the webhook URL with GET to verify it.
async fn webhook_hint() -> Json<Value> {
    Json(json!({ "ok": true, "hint": "POST here from LINE webhook" }))
}

/// LINE webhook receiver.
///
/// Strict signature policy: a delivery with a missing or mismatched
/// signature is rejected with 401 before any event is looked at.
async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let Some(secret) = state.config.line_channel_secret.as_deref() else {
        error!("Webhook received but LINE_CHANNEL_SECRET is not configured");
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing LINE_CHANNEL_SECRET",
        ));
    };

    let signature = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !line::verify_signature(secret, body.as_bytes(), signature) {
        warn!("Rejected webhook delivery with bad signature");
        return Err(api_error(StatusCode::UNAUTHORIZED, "Bad signature"));
    }

    // The signature proved the sender, so a malformed body is treated as an
    // empty delivery rather than an error back to LINE.
    let payload: WebhookPayload = serde_json::from_str(&body).unwrap_or_else(|e| {
        warn!("Malformed webhook body: {}", e);
        WebhookPayload::default()
    });

    state.pipeline.process_delivery(&payload.events).await;

    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::testing::MemoryKv;
    use crate::lang::Direction;
    use crate::line::ReplySink;
    use crate::prompt::PromptStyle;
    use crate::translator::Translate;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use http_body_util::BodyExt;
    use sha2::Sha256;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FakeTranslate {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Translate for FakeTranslate {
        async fn translate(
            &self,
            text: &str,
            _direction: Direction,
            _style: PromptStyle,
        ) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(format!("[{}]", text))
        }
    }

    #[derive(Default)]
    struct FakeReply {
        replies: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ReplySink for FakeReply {
        async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
            self.replies
                .lock()
                .unwrap()
                .push((reply_token.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            openai_api_key: Some("sk-test".to_string()),
            openai_model: "gpt-4o-mini".to_string(),
            line_channel_secret: Some("secret".to_string()),
            line_channel_access_token: Some("token".to_string()),
            kv_rest_api_url: Some("https://kv.example.com".to_string()),
            kv_rest_api_token: Some("kv-token".to_string()),
            admin_pin: Some("1234".to_string()),
            glossary_key: "family_glossary_v1".to_string(),
            glossary_cache_ttl_secs: 20,
            family_group_ids: vec!["G1".to_string()],
            host: std::net::Ipv4Addr::LOCALHOST,
            port: 0,
        }
    }

    struct TestApp {
        router: Router,
        translator: Arc<FakeTranslate>,
        reply: Arc<FakeReply>,
    }

    fn test_app() -> TestApp {
        let config = test_config();
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let glossary = GlossaryStore::new(
            kv.clone(),
            &config.glossary_key,
            Duration::from_secs(config.glossary_cache_ttl_secs),
        );
        let translator = Arc::new(FakeTranslate {
            calls: Mutex::new(0),
        });
        let reply = Arc::new(FakeReply::default());
        let pipeline = WebhookPipeline::new(
            translator.clone(),
            reply.clone(),
            config.family_group_ids.clone(),
        );

        let state = Arc::new(AppState {
            config,
            glossary,
            pipeline,
            kv,
        });

        TestApp {
            router: router(state),
            translator,
            reply,
        }
    }

    fn sign(secret: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn webhook_body(text: &str) -> String {
        serde_json::json!({
            "events": [{
                "type": "message",
                "replyToken": "tok1",
                "message": { "type": "text", "text": text },
                "source": { "type": "group", "groupId": "G1" }
            }]
        })
        .to_string()
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_with_valid_signature_translates_and_replies() {
        let app = test_app();
        let body = webhook_body("晚安");
        let sig = sign("secret", &body);

        let response = app
            .router
            .oneshot(
                Request::post("/line/webhook")
                    .header("x-line-signature", sig)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["ok"], true);

        assert_eq!(*app.translator.calls.lock().unwrap(), 1);
        let replies = app.reply.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert!(!replies[0].1.is_empty());
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected_before_processing() {
        let app = test_app();
        let body = webhook_body("晚安");

        let response = app
            .router
            .oneshot(
                Request::post("/line/webhook")
                    .header("x-line-signature", "AAAA")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(*app.translator.calls.lock().unwrap(), 0);
        assert!(app.reply.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_acknowledges_url_only_delivery_without_replying() {
        let app = test_app();
        let body = webhook_body("https://example.com");
        let sig = sign("secret", &body);

        let response = app
            .router
            .oneshot(
                Request::post("/line/webhook")
                    .header("x-line-signature", sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*app.translator.calls.lock().unwrap(), 0);
        assert!(app.reply.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_requires_pin() {
        let app = test_app();

        let response = app
            .router
            .oneshot(
                Request::post("/admin/glossary")
                    .header("content-type", "application/json")
                    .header("x-admin-pin", "wrong")
                    .body(Body::from(r#"{"action":"list"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_upsert_rejects_empty_key() {
        let app = test_app();

        let response = app
            .router
            .oneshot(
                Request::post("/admin/glossary")
                    .header("content-type", "application/json")
                    .header("x-admin-pin", "1234")
                    .body(Body::from(
                        r#"{"action":"upsert","entry":{"zh":"  ","vi":"x"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "zh required");
    }

    #[tokio::test]
    async fn admin_upsert_then_public_read_round_trips() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(
                Request::post("/admin/glossary")
                    .header("content-type", "application/json")
                    .header("x-admin-pin", "1234")
                    .body(Body::from(
                        r#"{"action":"upsert","entry":{"zh":"晚安","vi":"ngủ ngon nha"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router
            .oneshot(
                Request::get("/glossary?force=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["glossary"][0]["zh"], "晚安");
    }

    #[tokio::test]
    async fn admin_unknown_action_is_bad_request() {
        let app = test_app();

        let response = app
            .router
            .oneshot(
                Request::post("/admin/glossary")
                    .header("content-type", "application/json")
                    .header("x-admin-pin", "1234")
                    .body(Body::from(r#"{"action":"explode"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_presence_flags_not_values() {
        let app = test_app();

        let response = app
            .router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["env"]["OPENAI_API_KEY"], true);
        assert_eq!(json["env"]["FAMILY_GLOSSARY_KEY"], true);
        assert_eq!(json["env"]["FAMILY_GROUP_IDS_count"], 1);
        // secrets and the storage key never appear, only presence flags
        assert!(!json.to_string().contains("sk-test"));
        assert!(!json.to_string().contains("family_glossary_v1"));
    }
}

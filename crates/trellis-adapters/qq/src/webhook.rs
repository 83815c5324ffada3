//! Webhook HTTP surface.
//!
//! One POST route serves every QQ bot in the process; the `X-Bot-Appid`
//! header routes each callback to its bot. The processing order is fixed:
//!
//! 1. identify the bot (appid cache, then the record store);
//! 2. parse the `{op, t, d, id}` envelope;
//! 3. verify the Ed25519 signature — before every other code path,
//!    including callback-URL verification;
//! 4. answer the op 13 handshake;
//! 5. deduplicate by event id (24h TTL, recorded before dispatch);
//! 6. hand the event to the bot's adapter.
//!
//! Identity and signature failures map to 404/401; everything else answers
//! 200 with a `status` body.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use trellis_core::{AdapterManager, Event, KvStore, RecordStore};

use crate::events::{Envelope, OP_DISPATCH, OP_HANDSHAKE};
use crate::sign;

/// Default mount path for the webhook route.
pub const WEBHOOK_PATH: &str = "/webhook/qq";

/// Dedup keys live this long.
const DEDUP_TTL: Duration = Duration::from_secs(86_400);

/// Shared state behind the webhook route.
pub struct WebhookState {
    manager: Arc<AdapterManager>,
    store: Arc<dyn RecordStore>,
    kv: Arc<dyn KvStore>,
    appid_cache: RwLock<HashMap<String, i64>>,
}

impl WebhookState {
    /// Creates the webhook state.
    pub fn new(
        manager: Arc<AdapterManager>,
        store: Arc<dyn RecordStore>,
        kv: Arc<dyn KvStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            store,
            kv,
            appid_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn bot_id_for_app(&self, app_id: &str) -> Option<i64> {
        if let Some(bot_id) = self.appid_cache.read().get(app_id) {
            return Some(*bot_id);
        }
        // Cache miss: consult the store and remember the mapping.
        let bot = self
            .store
            .bot_by_config_field("qq", "app_id", app_id)
            .await
            .ok()??;
        self.appid_cache.write().insert(app_id.to_string(), bot.id);
        Some(bot.id)
    }

    async fn secret_for_bot(&self, bot_id: i64) -> Option<String> {
        let bot = self.store.bot(bot_id).await.ok()??;
        bot.config
            .get("app_secret")
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }
}

/// Relevant request headers, extracted once.
#[derive(Debug, Default, Clone)]
pub struct WebhookHeaders {
    /// `X-Bot-Appid`.
    pub app_id: Option<String>,
    /// `X-Signature-Ed25519` (hex).
    pub signature: Option<String>,
    /// `X-Signature-Timestamp`.
    pub timestamp: Option<String>,
    /// `User-Agent`.
    pub user_agent: Option<String>,
}

impl WebhookHeaders {
    fn from_header_map(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };
        Self {
            app_id: get("x-bot-appid"),
            signature: get("x-signature-ed25519"),
            timestamp: get("x-signature-timestamp"),
            user_agent: get("user-agent"),
        }
    }
}

/// Builds the axum router serving the webhook at [`WEBHOOK_PATH`].
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handle_webhook))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let headers = WebhookHeaders::from_header_map(&headers);
    let (status, payload) = process(&state, &headers, &body).await;
    (status, Json(payload)).into_response()
}

/// The full webhook processing flow, separated from axum for testability.
pub async fn process(
    state: &WebhookState,
    headers: &WebhookHeaders,
    body: &[u8],
) -> (StatusCode, Value) {
    let Some(app_id) = headers.app_id.as_deref() else {
        return (
            StatusCode::BAD_REQUEST,
            json!({"error": "Missing X-Bot-Appid header"}),
        );
    };

    if let Some(user_agent) = headers.user_agent.as_deref()
        && !user_agent.starts_with("QQBot-Callback")
    {
        warn!(user_agent = %user_agent, "Suspicious webhook User-Agent");
    }

    let Some(envelope) = Envelope::parse(body) else {
        return (
            StatusCode::BAD_REQUEST,
            json!({"error": "Invalid event data"}),
        );
    };

    let Some(bot_id) = state.bot_id_for_app(app_id).await else {
        warn!(app_id = %app_id, "Webhook for unknown bot");
        return (StatusCode::NOT_FOUND, json!({"error": "Bot not found"}));
    };

    // Signature verification precedes every code path, the handshake
    // included.
    let secret = state.secret_for_bot(bot_id).await.unwrap_or_default();
    let verified = match (headers.signature.as_deref(), headers.timestamp.as_deref()) {
        (Some(signature), Some(timestamp)) if !secret.is_empty() => {
            sign::verify_signature(&secret, timestamp, body, signature)
        }
        _ => false,
    };
    if !verified {
        warn!(bot_id, "Webhook signature verification failed");
        return (
            StatusCode::UNAUTHORIZED,
            json!({"error": "Invalid signature"}),
        );
    }

    if envelope.op == OP_HANDSHAKE {
        return handshake(&secret, &envelope.d);
    }

    if !state.manager.is_running(bot_id) {
        debug!(bot_id, "Webhook for disabled bot ignored");
        return (
            StatusCode::OK,
            json!({"status": "ignored", "reason": "bot_disabled"}),
        );
    }

    // At-most-once processing: record the event id before handing off.
    if let Some(event_id) = envelope.id.as_deref().filter(|id| !id.is_empty()) {
        let key = dedup_key(event_id);
        match state.kv.get(&key).await {
            Ok(Some(_)) => {
                info!(bot_id, event_id = %event_id, "Duplicate event suppressed");
                return (
                    StatusCode::OK,
                    json!({"status": "duplicate", "message": "Event already processed"}),
                );
            }
            Ok(None) => {
                if let Err(err) = state.kv.set(&key, "true", Some(DEDUP_TTL)).await {
                    warn!(error = %err, "Failed to record dedup key");
                }
            }
            Err(err) => {
                warn!(error = %err, "Dedup lookup failed, processing anyway");
            }
        }
    }

    if envelope.op != OP_DISPATCH {
        return (StatusCode::OK, json!({"status": "ignored"}));
    }

    let Some(adapter) = state.manager.adapter(bot_id) else {
        return (
            StatusCode::OK,
            json!({"status": "ignored", "reason": "bot_disabled"}),
        );
    };

    let raw: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    match adapter.parse_event(&raw) {
        Some(event) => {
            info!(
                bot_id,
                event = %event.event_name(),
                "Webhook event accepted"
            );
            if let Some(handler) = adapter.event_handler() {
                tokio::spawn(handler(event));
            } else {
                warn!(bot_id, "No event handler installed, event dropped");
            }
            (StatusCode::OK, json!({"status": "success"}))
        }
        None => (
            StatusCode::OK,
            json!({
                "status": "ignored",
                "message": format!("Unhandled event type: {}", envelope.t.as_deref().unwrap_or("")),
            }),
        ),
    }
}

fn handshake(secret: &str, payload: &Value) -> (StatusCode, Value) {
    let plain_token = payload.get("plain_token").and_then(Value::as_str);
    let event_ts = payload.get("event_ts").and_then(Value::as_str);

    match (plain_token, event_ts) {
        (Some(plain_token), Some(event_ts)) => {
            info!("Answering callback-URL verification");
            let signature = sign::sign_handshake(secret, event_ts, plain_token);
            (
                StatusCode::OK,
                json!({"plain_token": plain_token, "signature": signature}),
            )
        }
        _ => (
            StatusCode::BAD_REQUEST,
            json!({"error": "Missing required parameters"}),
        ),
    }
}

fn dedup_key(event_id: &str) -> String {
    format!("qq_event_dedup:{}:{event_id}", Utc::now().format("%Y%m%d"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::json;

    use trellis_core::{
        Adapter, AdapterResult, AdapterStatus, ApiResult, BotRecord, BoxedEvent, EventHandler,
        MemoryKv, MemoryStore,
    };

    use super::*;
    use crate::events::build_event;

    const SECRET: &str = "DG5g3B4j9X2KOErG";
    const APP_ID: &str = "102001";

    /// Adapter stub that parses real envelopes but skips the network.
    struct TestAdapter {
        handler: RwLock<Option<EventHandler>>,
        parsed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Adapter for TestAdapter {
        fn protocol_name(&self) -> &'static str {
            "qq"
        }

        fn cache_key_field(&self) -> Option<&'static str> {
            Some("app_id")
        }

        async fn start(&self) -> AdapterResult<()> {
            Ok(())
        }

        async fn stop(&self) {}

        fn parse_event(&self, raw: &Value) -> Option<BoxedEvent> {
            let envelope: Envelope = serde_json::from_value(raw.clone()).ok()?;
            let event = build_event(envelope.t.as_deref()?, &envelope.d, APP_ID)?;
            self.parsed.fetch_add(1, Ordering::SeqCst);
            Some(event)
        }

        async fn call_api(&self, _action: &str, _params: Value) -> ApiResult<Value> {
            Ok(Value::Null)
        }

        fn set_event_handler(&self, handler: EventHandler) {
            *self.handler.write() = Some(handler);
        }

        fn event_handler(&self) -> Option<EventHandler> {
            self.handler.read().clone()
        }

        fn bot(&self) -> Option<Arc<dyn trellis_core::Bot>> {
            None
        }

        fn status(&self) -> AdapterStatus {
            AdapterStatus::stopped()
        }
    }

    async fn setup(running: bool) -> (Arc<WebhookState>, Arc<AtomicUsize>) {
        let store = Arc::new(MemoryStore::new());
        store.put_bot(BotRecord {
            id: 1,
            name: "qq bot".into(),
            protocol: "qq".into(),
            config: json!({"app_id": APP_ID, "app_secret": SECRET}),
            owner_id: 10,
            enabled: true,
        });

        let parsed = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(AdapterManager::new());
        let parsed_for_ctor = Arc::clone(&parsed);
        manager.register("qq", move |_bot_id, _config| {
            Ok(Arc::new(TestAdapter {
                handler: RwLock::new(None),
                parsed: Arc::clone(&parsed_for_ctor),
            }) as Arc<dyn Adapter>)
        });
        if running {
            let handler: EventHandler = Arc::new(|_event| Box::pin(async {}));
            manager
                .start_adapter(1, "qq", json!({}), Some(handler))
                .await
                .unwrap();
        }

        let kv = Arc::new(MemoryKv::new());
        (WebhookState::new(manager, store, kv), parsed)
    }

    fn signed_headers(body: &[u8]) -> WebhookHeaders {
        let timestamp = "1700000000";
        let key = SigningKey::from_bytes(&sign::derive_seed(SECRET));
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        WebhookHeaders {
            app_id: Some(APP_ID.into()),
            signature: Some(hex::encode(key.sign(&message).to_bytes())),
            timestamp: Some(timestamp.into()),
            user_agent: Some("QQBot-Callback/1.0".into()),
        }
    }

    #[tokio::test]
    async fn test_handshake_round_trip() {
        let (state, _) = setup(false).await;
        let body =
            br#"{"op":13,"d":{"plain_token":"abc","event_ts":"1700000000"}}"#;

        let (status, payload) = process(&state, &signed_headers(body), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["plain_token"], "abc");
        assert_eq!(
            payload["signature"].as_str().unwrap(),
            sign::sign_handshake(SECRET, "1700000000", "abc")
        );
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected() {
        let (state, _) = setup(true).await;
        let body = br#"{"op":0,"t":"C2C_MESSAGE_CREATE","id":"E1","d":{}}"#;

        let mut headers = signed_headers(body);
        headers.signature = Some("00".repeat(64));
        let (status, _) = process(&state, &headers, body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut missing = signed_headers(body);
        missing.signature = None;
        let (status, _) = process(&state, &missing, body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_app_id_is_404() {
        let (state, _) = setup(true).await;
        let body = br#"{"op":0,"t":"C2C_MESSAGE_CREATE","id":"E1","d":{}}"#;
        let mut headers = signed_headers(body);
        headers.app_id = Some("999999".into());

        let (status, _) = process(&state, &headers, body).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disabled_bot_ignored() {
        let (state, parsed) = setup(false).await;
        let body = br#"{"op":0,"t":"C2C_MESSAGE_CREATE","id":"E1","d":{"author":{"user_openid":"U1"},"content":"hi"}}"#;

        let (status, payload) = process(&state, &signed_headers(body), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "ignored");
        assert_eq!(payload["reason"], "bot_disabled");
        assert_eq!(parsed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_event_suppressed() {
        let (state, parsed) = setup(true).await;
        let body = br#"{"op":0,"t":"GROUP_AT_MESSAGE_CREATE","id":"E1","d":{"group_openid":"G1","author":{"member_openid":"U1"},"content":"ping"}}"#;
        let headers = signed_headers(body);

        let (status, payload) = process(&state, &headers, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "success");
        assert_eq!(parsed.load(Ordering::SeqCst), 1);

        // Identical replay: suppressed without reaching the adapter again.
        let (status, payload) = process(&state, &headers, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "duplicate");
        assert_eq!(parsed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhandled_event_type_ignored() {
        let (state, _) = setup(true).await;
        let body = br#"{"op":0,"t":"SOMETHING_NEW","id":"E2","d":{}}"#;

        let (status, payload) = process(&state, &signed_headers(body), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "ignored");
    }
}

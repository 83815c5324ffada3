//! REST API client: token lifecycle, message send, media upload.
//!
//! # Token lifecycle
//!
//! Access tokens are short-lived. [`QqApiClient::ensure_authenticated`]
//! enforces the refresh policy:
//!
//! - token absent or expired → synchronous refresh, blocking the caller;
//! - token inside the 60s pre-expiry window → single-flight background
//!   refresh while the caller proceeds on the still-valid token;
//! - otherwise → no action.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use trellis_core::{ApiError, ApiResult};

use crate::seq::MsgSeqManager;

/// Refresh this long before the reported expiry.
const REFRESH_WINDOW: Duration = Duration::from_secs(60);

/// The kinds of send targets the platform distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// One-to-one chat by user openid.
    User,
    /// Group chat by group openid.
    Group,
    /// Guild channel by channel id.
    Channel,
    /// Guild direct message by guild id.
    Direct,
}

/// Media kinds accepted by the upload endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Image (png/jpg).
    Image,
    /// Video (mp4).
    Video,
    /// Voice (silk).
    Voice,
    /// Generic file.
    File,
}

impl MediaKind {
    /// Wire file_type discriminator.
    pub fn file_type(self) -> u8 {
        match self {
            MediaKind::Image => 1,
            MediaKind::Video => 2,
            MediaKind::Voice => 3,
            MediaKind::File => 4,
        }
    }
}

/// Where media content comes from.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Publicly fetchable URL.
    Url(String),
    /// Base64-encoded file content.
    Base64(String),
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    expires_at: Option<Instant>,
}

impl TokenState {
    fn is_valid(&self) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(_), Some(expires_at)) => Instant::now() < expires_at,
            _ => false,
        }
    }

    fn should_refresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() + REFRESH_WINDOW >= expires_at,
            None => true,
        }
    }
}

/// Shared between the client and its background refresh task.
struct ClientCore {
    http: reqwest::Client,
    app_id: String,
    client_secret: String,
    api_base: String,
    auth_url: String,
    token: Mutex<TokenState>,
    refreshing: AtomicBool,
}

/// HTTP client for the official bot API.
pub struct QqApiClient {
    core: Arc<ClientCore>,
    /// Per-msg_id sequence counters for outbound sends.
    pub seq: MsgSeqManager,
}

impl QqApiClient {
    /// Creates a client for one application.
    pub fn new(app_id: impl Into<String>, client_secret: impl Into<String>, sandbox: bool) -> Self {
        let api_base = if sandbox {
            "https://sandbox.api.sgroup.qq.com"
        } else {
            "https://api.sgroup.qq.com"
        };
        Self {
            core: Arc::new(ClientCore {
                http: reqwest::Client::new(),
                app_id: app_id.into(),
                client_secret: client_secret.into(),
                api_base: api_base.to_string(),
                auth_url: "https://bots.qq.com/app/getAppAccessToken".to_string(),
                token: Mutex::new(TokenState::default()),
                refreshing: AtomicBool::new(false),
            }),
            seq: MsgSeqManager::new(),
        }
    }

    /// Test hook: points both the API base and the auth endpoint at a local
    /// server. Only usable before the client is shared.
    pub fn with_endpoints(
        mut self,
        api_base: impl Into<String>,
        auth_url: impl Into<String>,
    ) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.api_base = api_base.into();
            core.auth_url = auth_url.into();
        }
        self
    }

    /// Returns the application id.
    pub fn app_id(&self) -> &str {
        &self.core.app_id
    }

    /// Exchanges `(appId, clientSecret)` for an access token.
    pub async fn authenticate(&self) -> ApiResult<()> {
        authenticate(&self.core).await
    }

    /// Applies the refresh policy. Called before every outbound request.
    pub async fn ensure_authenticated(&self) -> ApiResult<()> {
        let (valid, should_refresh) = {
            let token = self.core.token.lock();
            (token.is_valid(), token.should_refresh())
        };

        if !valid {
            // No usable token: the caller has to wait for a fresh one.
            return authenticate(&self.core).await;
        }

        if should_refresh && !self.core.refreshing.swap(true, Ordering::SeqCst) {
            // Pre-expiry window: refresh in the background, single-flighted.
            let core = Arc::clone(&self.core);
            tokio::spawn(async move {
                if let Err(err) = authenticate(&core).await {
                    warn!(app_id = %core.app_id, error = %err, "Background token refresh failed");
                }
                core.refreshing.store(false, Ordering::SeqCst);
            });
        }
        Ok(())
    }

    /// Returns the current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.core.token.lock().access_token.clone()
    }

    /// Returns true while a background refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.core.refreshing.load(Ordering::SeqCst)
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> ApiResult<Value> {
        self.ensure_authenticated().await?;
        let token = self.access_token().ok_or(ApiError::NotConnected)?;

        let url = format!("{}{path}", self.core.api_base);
        let mut request = self
            .core
            .http
            .request(method, &url)
            .header("Authorization", format!("QQBot {token}"))
            .timeout(Duration::from_secs(30));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ApiError::Other(format!("request failed: {err}")))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request rejected")
                .to_string();
            error!(url = %url, status = %status, code, message = %message, "API call failed");
            return Err(ApiError::Platform {
                code: if code != 0 { code } else { status.as_u16() as i64 },
                message,
            });
        }
        Ok(body)
    }

    fn message_path(target: SendTarget, target_id: &str) -> String {
        match target {
            SendTarget::User => format!("/v2/users/{target_id}/messages"),
            SendTarget::Group => format!("/v2/groups/{target_id}/messages"),
            SendTarget::Channel => format!("/channels/{target_id}/messages"),
            SendTarget::Direct => format!("/dms/{target_id}/messages"),
        }
    }

    /// Sends a prepared message payload to a target, attaching `msg_id` and
    /// the next `msg_seq` when replying to an inbound message.
    pub async fn send_message(
        &self,
        target: SendTarget,
        target_id: &str,
        mut payload: Value,
        msg_id: Option<&str>,
    ) -> ApiResult<Value> {
        if let Some(msg_id) = msg_id
            && let Some(object) = payload.as_object_mut()
        {
            object.insert("msg_id".into(), json!(msg_id));
            // Channel endpoints key replies on msg_id alone.
            if matches!(target, SendTarget::User | SendTarget::Group) {
                object
                    .entry("msg_seq")
                    .or_insert_with(|| json!(self.seq.next(Some(msg_id))));
            }
        }

        debug!(?target, target_id = %target_id, "Sending message");
        self.request(Method::POST, &Self::message_path(target, target_id), Some(payload))
            .await
    }

    /// Uploads rich media for a user or group target, returning the opaque
    /// `file_info` handle to embed in the subsequent send.
    pub async fn upload_media(
        &self,
        target: SendTarget,
        target_id: &str,
        kind: MediaKind,
        source: MediaSource,
    ) -> ApiResult<String> {
        let path = match target {
            SendTarget::User => format!("/v2/users/{target_id}/files"),
            SendTarget::Group => format!("/v2/groups/{target_id}/files"),
            _ => {
                return Err(ApiError::UnsupportedAction(
                    "media upload targets users and groups only".into(),
                ));
            }
        };

        let mut payload = json!({
            "file_type": kind.file_type(),
            "srv_send_msg": false,
        });
        match source {
            MediaSource::Url(url) => payload["url"] = json!(url),
            MediaSource::Base64(data) => payload["file_data"] = json!(data),
        }

        let response = self.request(Method::POST, &path, Some(payload)).await?;
        response
            .get("file_info")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| ApiError::Serialization("upload response carries no file_info".into()))
    }

    /// Recalls a channel message.
    pub async fn recall_channel_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> ApiResult<Value> {
        self.request(
            Method::DELETE,
            &format!("/channels/{channel_id}/messages/{message_id}?hidetip=true"),
            None,
        )
        .await
    }

    /// Fetches the bot account profile.
    pub async fn bot_info(&self) -> ApiResult<Value> {
        self.request(Method::GET, "/users/@me", None).await
    }
}

async fn authenticate(core: &ClientCore) -> ApiResult<()> {
    debug!(app_id = %core.app_id, "Requesting access token");

    let response = core
        .http
        .post(&core.auth_url)
        .json(&json!({
            "appId": core.app_id,
            "clientSecret": core.client_secret,
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|err| ApiError::AuthFailed(err.to_string()))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|err| ApiError::AuthFailed(err.to_string()))?;

    if !status.is_success() {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(ApiError::AuthFailed(message));
    }
    if let Some(code) = body.get("code").and_then(Value::as_i64)
        && code != 0
    {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(ApiError::AuthFailed(format!("{code}: {message}")));
    }

    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::AuthFailed("response carries no access_token".into()))?
        .to_string();
    let expires_in = body
        .get("expires_in")
        .and_then(lenient_u64)
        .unwrap_or(7200);

    let mut token = core.token.lock();
    token.access_token = Some(access_token);
    token.expires_at = Some(Instant::now() + Duration::from_secs(expires_in));
    info!(app_id = %core.app_id, expires_in, "Access token obtained");
    Ok(())
}

fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_state_windows() {
        let mut state = TokenState::default();
        assert!(!state.is_valid());
        assert!(state.should_refresh());

        state.access_token = Some("t".into());
        state.expires_at = Some(Instant::now() + Duration::from_secs(7200));
        assert!(state.is_valid());
        assert!(!state.should_refresh());

        // Inside the 60s pre-expiry window: still valid, wants a refresh.
        state.expires_at = Some(Instant::now() + Duration::from_secs(30));
        assert!(state.is_valid());
        assert!(state.should_refresh());
    }

    #[test]
    fn test_message_paths() {
        assert_eq!(
            QqApiClient::message_path(SendTarget::User, "u1"),
            "/v2/users/u1/messages"
        );
        assert_eq!(
            QqApiClient::message_path(SendTarget::Group, "g1"),
            "/v2/groups/g1/messages"
        );
        assert_eq!(
            QqApiClient::message_path(SendTarget::Channel, "c1"),
            "/channels/c1/messages"
        );
        assert_eq!(
            QqApiClient::message_path(SendTarget::Direct, "guild1"),
            "/dms/guild1/messages"
        );
    }
}

//! QQ bot: outbound message construction and the raw API surface.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};
use tracing::debug;

use trellis_core::{ApiError, ApiResult, Bot, Event, Message, MessageEvent, MessageScene, Segment};

use crate::client::{MediaKind, MediaSource, QqApiClient, SendTarget};

/// One connected QQ bot account.
pub struct QqBot {
    bot_id: i64,
    self_id: String,
    client: Arc<QqApiClient>,
}

impl QqBot {
    /// Creates a bot over an authenticated client.
    pub fn new(bot_id: i64, client: Arc<QqApiClient>) -> Self {
        Self {
            bot_id,
            self_id: client.app_id().to_string(),
            client,
        }
    }

    /// Returns the API client.
    pub fn client(&self) -> &Arc<QqApiClient> {
        &self.client
    }

    fn target_of(event: &MessageEvent) -> ApiResult<(SendTarget, String)> {
        Ok(match event.scene {
            MessageScene::Group => (
                SendTarget::Group,
                event.group_id.clone().ok_or(ApiError::MissingSession)?,
            ),
            MessageScene::Private => (SendTarget::User, event.sender.user_id.clone()),
            MessageScene::Channel => (
                SendTarget::Channel,
                event.channel_id.clone().ok_or(ApiError::MissingSession)?,
            ),
            MessageScene::Direct => (
                SendTarget::Direct,
                event.guild_id.clone().ok_or(ApiError::MissingSession)?,
            ),
        })
    }

    /// Builds the wire payload for a message, uploading media first when the
    /// target requires the two-step send.
    async fn build_payload(
        &self,
        target: SendTarget,
        target_id: &str,
        message: &Message,
    ) -> ApiResult<Value> {
        let text = message.extract_plain_text();

        // Structured segments take precedence over plain content.
        for segment in message.iter() {
            match segment {
                Segment::Markdown(data) => {
                    let mut payload = Map::new();
                    payload.insert("msg_type".into(), json!(2));
                    payload.insert("markdown".into(), markdown_payload(data));
                    if let Some(keyboard_id) = &data.keyboard_id {
                        payload.insert("keyboard".into(), json!({"id": keyboard_id}));
                    }
                    return Ok(Value::Object(payload));
                }
                Segment::Ark(data) => {
                    return Ok(json!({
                        "msg_type": 3,
                        "ark": ark_payload(data),
                    }));
                }
                Segment::Keyboard(data) => {
                    return Ok(json!({
                        "msg_type": 2,
                        "markdown": {"content": text},
                        "keyboard": {"id": data.id},
                    }));
                }
                _ => {}
            }
        }

        if let Some(media_segment) = message.iter().find(|s| s.media().is_some()) {
            let media = media_segment.media().expect("filtered on media");
            match target {
                SendTarget::User | SendTarget::Group => {
                    // Rich media is never embedded: upload for a file_info
                    // handle, then reference it in the send.
                    let file_info = match &media.file_info {
                        Some(file_info) => file_info.clone(),
                        None => {
                            let kind = match media_segment {
                                Segment::Video(_) => MediaKind::Video,
                                Segment::Voice(_) => MediaKind::Voice,
                                Segment::File(_) => MediaKind::File,
                                _ => MediaKind::Image,
                            };
                            let source = media_source(&media.file).await?;
                            self.client
                                .upload_media(target, target_id, kind, source)
                                .await?
                        }
                    };
                    return Ok(json!({
                        "msg_type": 7,
                        "media": {"file_info": file_info},
                        // The platform rejects media sends with empty content.
                        "content": if text.is_empty() { " ".to_string() } else { text },
                    }));
                }
                SendTarget::Channel | SendTarget::Direct => {
                    return Ok(json!({
                        "content": text,
                        "image": media.file,
                    }));
                }
            }
        }

        match target {
            SendTarget::User | SendTarget::Group => Ok(json!({
                "msg_type": 0,
                "content": text,
            })),
            SendTarget::Channel | SendTarget::Direct => Ok(json!({ "content": text })),
        }
    }
}

/// Resolves a media reference: URLs pass through, local files are read and
/// base64-encoded, anything else is assumed to be base64 content already.
async fn media_source(file: &str) -> ApiResult<MediaSource> {
    if file.starts_with("http://") || file.starts_with("https://") {
        return Ok(MediaSource::Url(file.to_string()));
    }
    if tokio::fs::try_exists(file).await.unwrap_or(false) {
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|err| ApiError::Other(format!("failed to read media file: {err}")))?;
        return Ok(MediaSource::Base64(BASE64.encode(bytes)));
    }
    Ok(MediaSource::Base64(file.to_string()))
}

fn markdown_payload(data: &trellis_core::message::MarkdownData) -> Value {
    match &data.template_id {
        Some(template_id) => {
            // Template params come from the content as a JSON object.
            let params: Vec<Value> = serde_json::from_str::<Map<String, Value>>(&data.content)
                .map(|object| {
                    object
                        .into_iter()
                        .map(|(key, value)| {
                            let rendered = match value {
                                Value::String(s) => s,
                                other => other.to_string(),
                            };
                            json!({"key": key, "values": [rendered]})
                        })
                        .collect()
                })
                .unwrap_or_default();
            json!({"custom_template_id": template_id, "params": params})
        }
        None => json!({"content": data.content}),
    }
}

fn ark_payload(data: &trellis_core::message::ArkData) -> Value {
    let kv: Vec<Value> = serde_json::from_str::<Map<String, Value>>(&data.content)
        .map(|object| {
            object
                .into_iter()
                .map(|(key, value)| {
                    let rendered = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    json!({"key": key, "value": rendered})
                })
                .collect()
        })
        .unwrap_or_default();
    json!({"template_id": data.template_id, "kv": kv})
}

#[async_trait]
impl Bot for QqBot {
    fn bot_id(&self) -> i64 {
        self.bot_id
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn protocol(&self) -> &'static str {
        "qq"
    }

    async fn send(&self, event: &dyn Event, message: &Message) -> ApiResult<Value> {
        let message_event = event
            .as_any()
            .downcast_ref::<MessageEvent>()
            .ok_or(ApiError::MissingSession)?;
        let (target, target_id) = Self::target_of(message_event)?;

        let payload = self.build_payload(target, &target_id, message).await?;
        debug!(target_id = %target_id, "Sending QQ message");
        self.client
            .send_message(target, &target_id, payload, Some(&message_event.message_id))
            .await
    }

    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        let str_param = |key: &str| -> ApiResult<String> {
            params
                .get(key)
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| ApiError::Serialization(format!("missing '{key}'")))
        };

        match action {
            "send_message" => {
                let target = parse_target(&str_param("target_type")?)?;
                let target_id = str_param("target_id")?;
                let payload = params.get("payload").cloned().unwrap_or(json!({}));
                let msg_id = params.get("msg_id").and_then(Value::as_str);
                self.client
                    .send_message(target, &target_id, payload, msg_id)
                    .await
            }
            "upload_media" => {
                let target = parse_target(&str_param("target_type")?)?;
                let target_id = str_param("target_id")?;
                let kind = match params.get("file_type").and_then(Value::as_u64) {
                    Some(2) => MediaKind::Video,
                    Some(3) => MediaKind::Voice,
                    Some(4) => MediaKind::File,
                    _ => MediaKind::Image,
                };
                let source = if let Some(url) = params.get("url").and_then(Value::as_str) {
                    MediaSource::Url(url.to_string())
                } else {
                    MediaSource::Base64(str_param("file_data")?)
                };
                let file_info = self
                    .client
                    .upload_media(target, &target_id, kind, source)
                    .await?;
                Ok(json!({"file_info": file_info}))
            }
            "recall_channel_message" => {
                self.client
                    .recall_channel_message(&str_param("channel_id")?, &str_param("message_id")?)
                    .await
            }
            "bot_info" => self.client.bot_info().await,
            other => Err(ApiError::UnsupportedAction(other.to_string())),
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn parse_target(s: &str) -> ApiResult<SendTarget> {
    match s {
        "user" | "private" => Ok(SendTarget::User),
        "group" => Ok(SendTarget::Group),
        "channel" => Ok(SendTarget::Channel),
        "direct" | "dm" => Ok(SendTarget::Direct),
        other => Err(ApiError::Serialization(format!(
            "unknown target type '{other}'"
        ))),
    }
}

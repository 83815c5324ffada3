//! Inbound webhook event processing.
//!
//! Every callback body is the envelope `{op, t, d, id}`. Dispatch payloads
//! (`op == 0`) are routed by event type to a processor that extracts the
//! sender/target/content fields and builds the matching core event. The
//! processors differ only in field extraction; their shape is symmetric.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use trellis_core::{
    BoxedEvent, Message, MessageEvent, MessageScene, NoticeEvent, Segment, Sender,
};

/// Operation code for event dispatch payloads.
pub const OP_DISPATCH: i64 = 0;
/// Operation code for the callback-URL verification handshake.
pub const OP_HANDSHAKE: i64 = 13;

/// The webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Operation code.
    pub op: i64,
    /// Event type, present for dispatch payloads.
    #[serde(default)]
    pub t: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub d: Value,
    /// Platform event id, used for deduplication.
    #[serde(default)]
    pub id: Option<String>,
}

impl Envelope {
    /// Parses an envelope from the raw body.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

/// Builds a core event from a dispatch payload, or `None` for event types
/// the platform emits but workflows cannot observe.
pub fn build_event(event_type: &str, payload: &Value, self_id: &str) -> Option<BoxedEvent> {
    match event_type {
        "GROUP_AT_MESSAGE_CREATE" => message_event(payload, self_id, MessageScene::Group),
        "C2C_MESSAGE_CREATE" => message_event(payload, self_id, MessageScene::Private),
        "MESSAGE_CREATE" | "AT_MESSAGE_CREATE" => {
            message_event(payload, self_id, MessageScene::Channel)
        }
        "DIRECT_MESSAGE_CREATE" => message_event(payload, self_id, MessageScene::Direct),

        "GUILD_CREATE" | "GUILD_UPDATE" | "GUILD_DELETE" | "CHANNEL_CREATE" | "CHANNEL_UPDATE"
        | "CHANNEL_DELETE" | "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" | "GUILD_MEMBER_REMOVE"
        | "FRIEND_ADD" | "FRIEND_DEL" | "GROUP_ADD_ROBOT" | "GROUP_DEL_ROBOT"
        | "C2C_MSG_REJECT" | "C2C_MSG_RECEIVE" | "GROUP_MSG_REJECT" | "GROUP_MSG_RECEIVE"
        | "INTERACTION_CREATE" | "MESSAGE_AUDIT_PASS" | "MESSAGE_AUDIT_REJECT" => {
            notice_event(event_type, payload, self_id)
        }

        _ => None,
    }
}

fn message_event(payload: &Value, self_id: &str, scene: MessageScene) -> Option<BoxedEvent> {
    let author = payload.get("author").cloned().unwrap_or(Value::Null);
    let user_id = author
        .get("user_openid")
        .or_else(|| author.get("member_openid"))
        .or_else(|| author.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let group_id = payload
        .get("group_openid")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let channel_id = payload
        .get("channel_id")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let guild_id = payload
        .get("guild_id")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let content = payload
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let mut message = Message::new();
    if !content.is_empty() {
        message.push(Segment::text(content));
    }
    // Image/file attachments arrive out of band from the text content.
    if let Some(attachments) = payload.get("attachments").and_then(Value::as_array) {
        for attachment in attachments {
            if let Some(url) = attachment.get("url").and_then(Value::as_str) {
                message.push(Segment::image(url));
            }
        }
    }

    let nickname = author
        .get("username")
        .or_else(|| author.get("nickname"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Some(BoxedEvent::new(MessageEvent {
        protocol: "qq",
        self_id: self_id.to_string(),
        time: Utc::now().timestamp(),
        scene,
        message_id: payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        sender: Sender {
            user_id,
            nickname,
            role: None,
        },
        group_id,
        channel_id,
        guild_id,
        message,
        // Webhook message events all address the bot (@ or direct chat).
        to_me: true,
        raw: payload.clone(),
    }))
}

fn notice_event(event_type: &str, payload: &Value, self_id: &str) -> Option<BoxedEvent> {
    let user_id = payload
        .get("openid")
        .or_else(|| payload.get("op_member_openid"))
        .or_else(|| payload.get("user").and_then(|u| u.get("id")))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let group_id = payload
        .get("group_openid")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Some(BoxedEvent::new(NoticeEvent {
        protocol: "qq",
        self_id: self_id.to_string(),
        time: payload
            .get("timestamp")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| Utc::now().timestamp()),
        notice_type: event_type.to_lowercase(),
        user_id,
        group_id,
        raw: payload.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use trellis_core::Event;

    use super::*;

    #[test]
    fn test_envelope_parse() {
        let body = br#"{"op":0,"t":"GROUP_AT_MESSAGE_CREATE","id":"E1","d":{"content":"hi"}}"#;
        let envelope = Envelope::parse(body).unwrap();
        assert_eq!(envelope.op, OP_DISPATCH);
        assert_eq!(envelope.t.as_deref(), Some("GROUP_AT_MESSAGE_CREATE"));
        assert_eq!(envelope.id.as_deref(), Some("E1"));

        assert!(Envelope::parse(b"not json").is_none());
    }

    #[test]
    fn test_group_at_message_event() {
        let payload = json!({
            "id": "msg-1",
            "content": " hello bot ",
            "group_openid": "G1",
            "author": {"member_openid": "U1", "username": "alice"}
        });
        let event = build_event("GROUP_AT_MESSAGE_CREATE", &payload, "102001").unwrap();
        let message = event.downcast_ref::<MessageEvent>().unwrap();
        assert_eq!(message.scene, MessageScene::Group);
        assert_eq!(message.sender.user_id, "U1");
        assert_eq!(message.message.extract_plain_text(), "hello bot");
        assert_eq!(event.session_id().unwrap(), "group_G1");
        assert!(message.to_me);
    }

    #[test]
    fn test_c2c_message_event() {
        let payload = json!({
            "id": "msg-2",
            "content": "hi",
            "author": {"user_openid": "U9"}
        });
        let event = build_event("C2C_MESSAGE_CREATE", &payload, "102001").unwrap();
        assert_eq!(event.session_id().unwrap(), "private_U9");
    }

    #[test]
    fn test_channel_message_with_attachment() {
        let payload = json!({
            "id": "msg-3",
            "content": "look",
            "channel_id": "C7",
            "guild_id": "G7",
            "author": {"id": "U2", "username": "bob"},
            "attachments": [{"url": "https://img.example/1.png"}]
        });
        let event = build_event("AT_MESSAGE_CREATE", &payload, "102001").unwrap();
        let message = event.downcast_ref::<MessageEvent>().unwrap();
        assert_eq!(message.scene, MessageScene::Channel);
        assert!(message.message.has_image());
        assert_eq!(event.session_id().unwrap(), "channel_C7");
    }

    #[test]
    fn test_lifecycle_notice_event() {
        let payload = json!({"group_openid": "G1", "op_member_openid": "U1", "timestamp": 1700000000});
        let event = build_event("GROUP_ADD_ROBOT", &payload, "102001").unwrap();
        let notice = event.downcast_ref::<NoticeEvent>().unwrap();
        assert_eq!(notice.notice_type, "group_add_robot");
        assert_eq!(event.sub_name(), Some("group_add_robot"));
        assert_eq!(notice.time, 1_700_000_000);
    }

    #[test]
    fn test_unknown_event_ignored() {
        assert!(build_event("SOMETHING_NEW", &json!({}), "1").is_none());
    }
}

//! OneBot v11 wire event parsing.
//!
//! Inbound frames carry `post_type ∈ {message, message_sent, notice,
//! request, meta_event}`. Messages arrive either as segment arrays or as
//! CQ-code strings; both forms map onto the core [`Message`] model (with the
//! wire name `record` mapped to the `voice` segment).

use chrono::Utc;
use serde_json::Value;

use trellis_core::{
    BoxedEvent, Message, MessageEvent, MessageScene, MetaEvent, NoticeEvent, RequestEvent,
    Segment, Sender, parse_cq_string,
};

/// Returns true for frames that are API responses rather than events.
pub fn is_api_response(frame: &Value) -> bool {
    frame.get("echo").is_some()
        && (frame.get("status").is_some() || frame.get("retcode").is_some())
}

/// Parses an inbound event frame into a core event.
///
/// `message_sent` (the bot's own outgoing echo) maps to a message event too;
/// filtering it is the adapter's job, controlled by `self_trigger`.
pub fn build_event(frame: &Value) -> Option<BoxedEvent> {
    let post_type = frame.get("post_type").and_then(Value::as_str)?;
    let self_id = field_string(frame, "self_id").unwrap_or_default();
    let time = frame
        .get("time")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| Utc::now().timestamp());

    match post_type {
        "message" | "message_sent" => {
            let message_type = frame.get("message_type").and_then(Value::as_str)?;
            let scene = match message_type {
                "group" => MessageScene::Group,
                _ => MessageScene::Private,
            };

            let sender_value = frame.get("sender").cloned().unwrap_or(Value::Null);
            let sender = Sender {
                user_id: field_string(frame, "user_id").unwrap_or_default(),
                nickname: sender_value
                    .get("card")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .or_else(|| sender_value.get("nickname").and_then(Value::as_str))
                    .map(ToString::to_string),
                role: sender_value
                    .get("role")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
            };

            let message = frame
                .get("message")
                .map(parse_message)
                .unwrap_or_default();
            let to_me = scene == MessageScene::Private
                || message.iter().any(
                    |seg| matches!(seg, Segment::At(at) if at.qq == self_id && !self_id.is_empty()),
                );

            Some(BoxedEvent::new(MessageEvent {
                protocol: "onebot",
                self_id,
                time,
                scene,
                message_id: field_string(frame, "message_id").unwrap_or_default(),
                sender,
                group_id: field_string(frame, "group_id"),
                channel_id: None,
                guild_id: None,
                message,
                to_me,
                raw: frame.clone(),
            }))
        }
        "notice" => Some(BoxedEvent::new(NoticeEvent {
            protocol: "onebot",
            self_id,
            time,
            notice_type: frame
                .get("notice_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            user_id: field_string(frame, "user_id"),
            group_id: field_string(frame, "group_id"),
            raw: frame.clone(),
        })),
        "request" => Some(BoxedEvent::new(RequestEvent {
            protocol: "onebot",
            self_id,
            time,
            request_type: frame
                .get("request_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            user_id: field_string(frame, "user_id"),
            group_id: field_string(frame, "group_id"),
            comment: frame
                .get("comment")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            flag: frame
                .get("flag")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            raw: frame.clone(),
        })),
        "meta_event" => Some(BoxedEvent::new(MetaEvent {
            protocol: "onebot",
            self_id,
            time,
            meta_type: frame
                .get("meta_event_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            raw: frame.clone(),
        })),
        _ => None,
    }
}

/// Returns true for `message_sent` frames, the bot's own outgoing echo.
pub fn is_self_echo(frame: &Value) -> bool {
    frame.get("post_type").and_then(Value::as_str) == Some("message_sent")
}

/// Parses either message wire form into the core model.
pub fn parse_message(value: &Value) -> Message {
    match value {
        Value::String(cq) => parse_cq_string(cq),
        Value::Array(items) => {
            let mut message = Message::new();
            for item in items {
                if let Some(segment) = parse_segment(item) {
                    message.push(segment);
                }
            }
            message
        }
        _ => Message::new(),
    }
}

fn parse_segment(item: &Value) -> Option<Segment> {
    let kind = item.get("type").and_then(Value::as_str)?;
    let data = item.get("data").cloned().unwrap_or(Value::Null);
    let str_field = |name: &str| -> Option<String> {
        data.get(name).and_then(Value::as_str).map(ToString::to_string)
    };

    match kind {
        "text" => Some(Segment::text(str_field("text")?)),
        "face" => Some(Segment::face(str_field("id")?)),
        "image" => Some(Segment::image(str_field("file")?)),
        "video" => Some(Segment::video(str_field("file")?)),
        // The wire name for voice clips is "record".
        "record" => Some(Segment::voice(str_field("file")?)),
        "file" => Some(Segment::file(str_field("file")?)),
        "at" => Some(Segment::at(str_field("qq")?)),
        "reply" => Some(Segment::reply(str_field("id")?)),
        // Segment kinds with no core counterpart (dice, shake, ...) are
        // dropped; plain-text extraction is unaffected.
        _ => None,
    }
}

/// Serializes a core message into the OneBot segment-array wire form.
pub fn to_wire_message(message: &Message) -> Value {
    let segments: Vec<Value> = message
        .iter()
        .filter_map(|segment| {
            let (kind, data) = match segment {
                Segment::Text(d) => ("text", serde_json::json!({"text": d.text})),
                Segment::Face(d) => ("face", serde_json::json!({"id": d.id})),
                Segment::Image(d) => ("image", serde_json::json!({"file": d.file})),
                Segment::Video(d) => ("video", serde_json::json!({"file": d.file})),
                Segment::Voice(d) => ("record", serde_json::json!({"file": d.file})),
                Segment::File(d) => ("file", serde_json::json!({"file": d.file})),
                Segment::At(d) => ("at", serde_json::json!({"qq": d.qq})),
                Segment::Reply(d) => ("reply", serde_json::json!({"id": d.id})),
                // Platform-exclusive segments cannot cross this protocol.
                Segment::Markdown(_) | Segment::Ark(_) | Segment::Keyboard(_) => return None,
            };
            Some(serde_json::json!({"type": kind, "data": data}))
        })
        .collect();
    Value::Array(segments)
}

fn field_string(frame: &Value, name: &str) -> Option<String> {
    match frame.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use trellis_core::{Event, EventKind};

    use super::*;

    #[test]
    fn test_api_response_detection() {
        assert!(is_api_response(
            &json!({"status": "ok", "retcode": 0, "echo": 1})
        ));
        assert!(!is_api_response(&json!({"post_type": "message"})));
        // An echo alone is not enough: events never carry status/retcode.
        assert!(!is_api_response(&json!({"echo": 5})));
    }

    #[test]
    fn test_group_message_array_form() {
        let frame = json!({
            "post_type": "message",
            "message_type": "group",
            "time": 1700000000,
            "self_id": 10000,
            "user_id": 42,
            "group_id": 777,
            "message_id": 555,
            "sender": {"nickname": "alice", "role": "member"},
            "message": [
                {"type": "at", "data": {"qq": "10000"}},
                {"type": "text", "data": {"text": " hello"}}
            ]
        });

        let event = build_event(&frame).unwrap();
        assert_eq!(event.kind(), EventKind::Message);
        let message = event.downcast_ref::<MessageEvent>().unwrap();
        assert_eq!(message.scene, MessageScene::Group);
        assert_eq!(message.sender.user_id, "42");
        assert_eq!(message.message.extract_plain_text(), " hello");
        assert!(message.to_me);
        assert_eq!(event.session_id().unwrap(), "group_777");
    }

    #[test]
    fn test_private_message_cq_string_form() {
        let frame = json!({
            "post_type": "message",
            "message_type": "private",
            "self_id": 10000,
            "user_id": 42,
            "message_id": 556,
            "sender": {"nickname": "bob"},
            "message": "hi [CQ:face,id=178]"
        });

        let event = build_event(&frame).unwrap();
        let message = event.downcast_ref::<MessageEvent>().unwrap();
        assert_eq!(message.message.len(), 2);
        assert!(message.to_me);
        assert_eq!(event.session_id().unwrap(), "private_42");
    }

    #[test]
    fn test_notice_and_request_events() {
        let notice = build_event(&json!({
            "post_type": "notice",
            "notice_type": "group_increase",
            "self_id": 1,
            "user_id": 42,
            "group_id": 7
        }))
        .unwrap();
        assert_eq!(notice.kind(), EventKind::Notice);
        assert_eq!(notice.sub_name(), Some("group_increase"));

        let request = build_event(&json!({
            "post_type": "request",
            "request_type": "friend",
            "self_id": 1,
            "user_id": 42,
            "comment": "add me",
            "flag": "f1"
        }))
        .unwrap();
        assert_eq!(request.kind(), EventKind::Request);
        let request = request.downcast_ref::<RequestEvent>().unwrap();
        assert_eq!(request.comment, "add me");
        assert_eq!(request.flag, "f1");
    }

    #[test]
    fn test_meta_event_and_self_echo() {
        let meta = build_event(&json!({
            "post_type": "meta_event",
            "meta_event_type": "heartbeat",
            "self_id": 1
        }))
        .unwrap();
        assert_eq!(meta.kind(), EventKind::Meta);

        assert!(is_self_echo(&json!({"post_type": "message_sent"})));
        assert!(!is_self_echo(&json!({"post_type": "message"})));
    }

    #[test]
    fn test_wire_message_round_trip() {
        let message = Message::from_segments(vec![
            Segment::reply("5"),
            Segment::text("see "),
            Segment::voice("v.silk"),
        ]);
        let wire = to_wire_message(&message);
        assert_eq!(wire[2]["type"], "record");
        assert_eq!(parse_message(&wire), message);
    }
}

//! Protocol-neutral event model.
//!
//! Adapters translate wire payloads into the concrete event structs defined
//! here ([`MessageEvent`], [`NoticeEvent`], [`RequestEvent`], [`MetaEvent`],
//! [`ScheduledEvent`]); the dispatch layer and the workflow engine only see
//! them through the [`Event`] trait and the [`BoxedEvent`] wrapper.
//!
//! Events are immutable after construction. The bot reference attached to a
//! [`BoxedEvent`] is weak: it resolves only while the owning adapter is
//! running.

use std::any::Any;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::bot::Bot;
use crate::message::Message;

// ============================================================================
// Event Kind
// ============================================================================

/// High-level classification of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Chat messages.
    Message,
    /// Notices (member changes, recalls, lifecycle of guilds/channels, ...).
    Notice,
    /// Requests (friend requests, group join requests, ...).
    Request,
    /// Protocol meta events (heartbeat, connection lifecycle).
    Meta,
    /// Synthetic events injected by the scheduler.
    Scheduled,
}

impl EventKind {
    /// Parses an event kind from its wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "message" | "message_sent" => Some(EventKind::Message),
            "notice" => Some(EventKind::Notice),
            "request" => Some(EventKind::Request),
            "meta" | "meta_event" => Some(EventKind::Meta),
            "scheduled" | "schedule" => Some(EventKind::Scheduled),
            _ => None,
        }
    }

    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Notice => "notice",
            EventKind::Request => "request",
            EventKind::Meta => "meta",
            EventKind::Scheduled => "scheduled",
        }
    }
}

/// The conversational scene a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageScene {
    /// One-to-one chat.
    Private,
    /// Group chat.
    Group,
    /// Guild channel.
    Channel,
    /// Guild direct message.
    Direct,
}

impl MessageScene {
    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageScene::Private => "private",
            MessageScene::Group => "group",
            MessageScene::Channel => "channel",
            MessageScene::Direct => "direct",
        }
    }
}

// ============================================================================
// Event Trait
// ============================================================================

/// The base trait for all events.
///
/// Concrete events are type-erased as `dyn Event` and can be recovered with
/// [`BoxedEvent::downcast_ref`].
pub trait Event: Any + Send + Sync {
    /// Returns the high-level event kind.
    fn kind(&self) -> EventKind;

    /// Returns a dotted event name for logs, e.g. `"message.group"`.
    fn event_name(&self) -> String {
        self.kind().as_str().to_string()
    }

    /// Returns the protocol that produced this event (`"qq"`, `"onebot"`).
    fn protocol(&self) -> &str;

    /// Returns the bot account id at the protocol endpoint.
    fn self_id(&self) -> &str;

    /// Returns the event timestamp (unix seconds).
    fn time(&self) -> i64;

    /// Returns the deterministic session id for this event's conversational
    /// context: `group_<gid>`, `channel_<cid>`, or `private_<uid>`.
    fn session_id(&self) -> Option<String> {
        None
    }

    /// Returns the id of the user that triggered the event, if any.
    fn user_id(&self) -> Option<&str> {
        None
    }

    /// Returns the group id, if the event happened in a group.
    fn group_id(&self) -> Option<&str> {
        None
    }

    /// Returns the kind-specific sub-name used for event filtering
    /// (`notice_type` / `request_type`).
    fn sub_name(&self) -> Option<&str> {
        None
    }

    /// Returns the message payload for message events.
    fn message(&self) -> Option<&Message> {
        None
    }

    /// Extracts plain text from the event, if applicable.
    fn plain_text(&self) -> String {
        self.message()
            .map(Message::extract_plain_text)
            .unwrap_or_default()
    }

    /// Returns the original wire payload, if preserved.
    fn raw(&self) -> Option<&Value> {
        None
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Concrete Events
// ============================================================================

/// Sender details attached to a message event.
#[derive(Debug, Clone, Default)]
pub struct Sender {
    /// User id.
    pub user_id: String,
    /// Display name, if known.
    pub nickname: Option<String>,
    /// Group card / role, if known.
    pub role: Option<String>,
}

/// A chat message event.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Protocol name.
    pub protocol: &'static str,
    /// Bot account id.
    pub self_id: String,
    /// Unix timestamp.
    pub time: i64,
    /// Conversational scene.
    pub scene: MessageScene,
    /// Message id assigned by the platform.
    pub message_id: String,
    /// Sender details.
    pub sender: Sender,
    /// Group id for group messages.
    pub group_id: Option<String>,
    /// Channel id for channel messages.
    pub channel_id: Option<String>,
    /// Guild id for channel/direct messages.
    pub guild_id: Option<String>,
    /// Parsed message content.
    pub message: Message,
    /// Whether the message addresses the bot (@mention, direct chat).
    pub to_me: bool,
    /// Original wire payload.
    pub raw: Value,
}

impl Event for MessageEvent {
    fn kind(&self) -> EventKind {
        EventKind::Message
    }

    fn event_name(&self) -> String {
        format!("message.{}", self.scene.as_str())
    }

    fn protocol(&self) -> &str {
        self.protocol
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn time(&self) -> i64 {
        self.time
    }

    fn session_id(&self) -> Option<String> {
        Some(match (&self.group_id, &self.channel_id) {
            (Some(gid), _) => format!("group_{gid}"),
            (None, Some(cid)) => format!("channel_{cid}"),
            (None, None) => format!("private_{}", self.sender.user_id),
        })
    }

    fn user_id(&self) -> Option<&str> {
        Some(&self.sender.user_id)
    }

    fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    fn message(&self) -> Option<&Message> {
        Some(&self.message)
    }

    fn raw(&self) -> Option<&Value> {
        Some(&self.raw)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A notice event (membership changes, recalls, lifecycle notifications).
#[derive(Debug, Clone)]
pub struct NoticeEvent {
    /// Protocol name.
    pub protocol: &'static str,
    /// Bot account id.
    pub self_id: String,
    /// Unix timestamp.
    pub time: i64,
    /// Notice sub-kind, e.g. `"group_increase"`, `"friend_add"`.
    pub notice_type: String,
    /// User the notice concerns, if any.
    pub user_id: Option<String>,
    /// Group the notice concerns, if any.
    pub group_id: Option<String>,
    /// Original wire payload.
    pub raw: Value,
}

impl Event for NoticeEvent {
    fn kind(&self) -> EventKind {
        EventKind::Notice
    }

    fn event_name(&self) -> String {
        format!("notice.{}", self.notice_type)
    }

    fn protocol(&self) -> &str {
        self.protocol
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn time(&self) -> i64 {
        self.time
    }

    fn session_id(&self) -> Option<String> {
        match (&self.group_id, &self.user_id) {
            (Some(gid), _) => Some(format!("group_{gid}")),
            (None, Some(uid)) => Some(format!("private_{uid}")),
            _ => None,
        }
    }

    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    fn sub_name(&self) -> Option<&str> {
        Some(&self.notice_type)
    }

    fn raw(&self) -> Option<&Value> {
        Some(&self.raw)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A request event (friend requests, group join requests).
#[derive(Debug, Clone)]
pub struct RequestEvent {
    /// Protocol name.
    pub protocol: &'static str,
    /// Bot account id.
    pub self_id: String,
    /// Unix timestamp.
    pub time: i64,
    /// Request sub-kind, e.g. `"friend"`, `"group"`.
    pub request_type: String,
    /// Requesting user.
    pub user_id: Option<String>,
    /// Target group, if any.
    pub group_id: Option<String>,
    /// Free-form request comment.
    pub comment: String,
    /// Approval flag used to answer the request.
    pub flag: String,
    /// Original wire payload.
    pub raw: Value,
}

impl Event for RequestEvent {
    fn kind(&self) -> EventKind {
        EventKind::Request
    }

    fn event_name(&self) -> String {
        format!("request.{}", self.request_type)
    }

    fn protocol(&self) -> &str {
        self.protocol
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn time(&self) -> i64 {
        self.time
    }

    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    fn sub_name(&self) -> Option<&str> {
        Some(&self.request_type)
    }

    fn raw(&self) -> Option<&Value> {
        Some(&self.raw)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A protocol meta event (heartbeat, connection lifecycle).
#[derive(Debug, Clone)]
pub struct MetaEvent {
    /// Protocol name.
    pub protocol: &'static str,
    /// Bot account id.
    pub self_id: String,
    /// Unix timestamp.
    pub time: i64,
    /// Meta sub-kind, e.g. `"heartbeat"`, `"lifecycle"`.
    pub meta_type: String,
    /// Original wire payload.
    pub raw: Value,
}

impl Event for MetaEvent {
    fn kind(&self) -> EventKind {
        EventKind::Meta
    }

    fn event_name(&self) -> String {
        format!("meta.{}", self.meta_type)
    }

    fn protocol(&self) -> &str {
        self.protocol
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn time(&self) -> i64 {
        self.time
    }

    fn sub_name(&self) -> Option<&str> {
        Some(&self.meta_type)
    }

    fn raw(&self) -> Option<&Value> {
        Some(&self.raw)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Synthetic event injected by the scheduler for timed workflows.
///
/// Carries no message, user, or group: scheduled workflows configure their
/// own send targets in their steps.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// Protocol of the bot the tick is fanned out to.
    pub protocol: String,
    /// Bot account id.
    pub self_id: String,
    /// Tick timestamp.
    pub time: i64,
    /// Name of the workflow that owns the schedule.
    pub workflow_name: String,
}

impl Event for ScheduledEvent {
    fn kind(&self) -> EventKind {
        EventKind::Scheduled
    }

    fn event_name(&self) -> String {
        format!("scheduled.{}", self.workflow_name)
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn time(&self) -> i64 {
        self.time
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased, cheaply cloneable event with an optional bot handle.
///
/// The bot handle is weak by design: events never keep an adapter alive, and
/// [`BoxedEvent::bot`] stops resolving once the adapter has shut down.
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
    bot: Option<Weak<dyn Bot>>,
}

impl BoxedEvent {
    /// Creates a new boxed event without a bot reference.
    pub fn new<E: Event + 'static>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
            bot: None,
        }
    }

    /// Attaches a bot handle, downgraded to weak.
    pub fn with_bot(mut self, bot: &Arc<dyn Bot>) -> Self {
        self.bot = Some(Arc::downgrade(bot));
        self
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Resolves the bot handle, if the owning adapter is still running.
    pub fn bot(&self) -> Option<Arc<dyn Bot>> {
        self.bot.as_ref().and_then(Weak::upgrade)
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event + 'static>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }
}

impl std::ops::Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("event_name", &self.event_name())
            .field("protocol", &self.protocol())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Segment;

    fn message_event(scene: MessageScene, group: Option<&str>, channel: Option<&str>) -> MessageEvent {
        MessageEvent {
            protocol: "onebot",
            self_id: "10000".into(),
            time: 1_700_000_000,
            scene,
            message_id: "m1".into(),
            sender: Sender {
                user_id: "42".into(),
                nickname: Some("tester".into()),
                role: None,
            },
            group_id: group.map(Into::into),
            channel_id: channel.map(Into::into),
            guild_id: None,
            message: Message::from_segments(vec![Segment::text("hi")]),
            to_me: false,
            raw: Value::Null,
        }
    }

    #[test]
    fn test_session_id_derivation() {
        let group = message_event(MessageScene::Group, Some("777"), None);
        assert_eq!(group.session_id().unwrap(), "group_777");

        let channel = message_event(MessageScene::Channel, None, Some("c9"));
        assert_eq!(channel.session_id().unwrap(), "channel_c9");

        let private = message_event(MessageScene::Private, None, None);
        assert_eq!(private.session_id().unwrap(), "private_42");
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("message"), Some(EventKind::Message));
        assert_eq!(EventKind::parse("meta_event"), Some(EventKind::Meta));
        assert_eq!(EventKind::parse("message_sent"), Some(EventKind::Message));
        assert_eq!(EventKind::parse("bogus"), None);
    }

    #[test]
    fn test_boxed_event_downcast() {
        let boxed = BoxedEvent::new(message_event(MessageScene::Private, None, None));
        assert_eq!(boxed.kind(), EventKind::Message);
        assert_eq!(boxed.event_name(), "message.private");
        assert!(boxed.downcast_ref::<MessageEvent>().is_some());
        assert!(boxed.downcast_ref::<NoticeEvent>().is_none());
        assert!(boxed.bot().is_none());
    }

    #[test]
    fn test_plain_text_default() {
        let notice = NoticeEvent {
            protocol: "onebot",
            self_id: "1".into(),
            time: 0,
            notice_type: "group_increase".into(),
            user_id: Some("42".into()),
            group_id: Some("7".into()),
            raw: Value::Null,
        };
        assert_eq!(notice.plain_text(), "");
        assert_eq!(notice.sub_name(), Some("group_increase"));
        assert_eq!(notice.event_name(), "notice.group_increase");
    }
}

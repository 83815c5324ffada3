//! Protocol-neutral message model.
//!
//! A [`Message`] is an ordered sequence of [`Segment`]s. A segment is the
//! smallest unit of content (plain text, an image, a mention, ...). The wire
//! representation is the tagged form `{"type": ..., "data": {...}}` shared by
//! both supported protocols; the legacy CQ-code string form is supported for
//! the WebSocket protocol via [`Message::to_cq_string`] and
//! [`parse_cq_string`].
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Message, Segment};
//!
//! let msg = Message::from_segments(vec![
//!     Segment::text("Hello, "),
//!     Segment::at("10001000"),
//! ]);
//! assert_eq!(msg.extract_plain_text(), "Hello, ");
//! ```

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

// ============================================================================
// Segment
// ============================================================================

/// A single message segment.
///
/// The serde representation is `{"type": "<kind>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text content.
    Text(TextData),
    /// Emoji/face by platform id.
    Face(FaceData),
    /// Image.
    Image(MediaData),
    /// Video.
    Video(MediaData),
    /// Voice/audio clip.
    Voice(MediaData),
    /// Generic file attachment.
    File(MediaData),
    /// @mention of a user (or `"all"`).
    At(AtData),
    /// Reply reference to another message.
    Reply(ReplyData),
    /// Markdown payload, optionally bound to a platform template.
    Markdown(MarkdownData),
    /// ARK structured card.
    Ark(ArkData),
    /// Inline keyboard reference.
    Keyboard(KeyboardData),
}

/// Plain text segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    /// The text content.
    pub text: String,
}

/// Face/emoji segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    /// Platform face id.
    pub id: String,
}

/// Shared data for media segments (image, video, voice, file).
///
/// `file` is a URL, local path, or base64 payload. `file_info` is the opaque
/// upload handle returned by protocols that require a two-step upload; a
/// media segment without one still [`needs upload`](Segment::needs_upload)
/// on such protocols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaData {
    /// Source: URL, path, or base64 content.
    pub file: String,
    /// Resolved download URL (receive only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Opaque upload handle (protocols with two-step media send).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<String>,
}

impl MediaData {
    /// Creates media data from a source reference.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            url: None,
            file_info: None,
        }
    }
}

/// @mention segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtData {
    /// Target user id, or `"all"`.
    pub qq: String,
}

/// Reply segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// Message id being replied to.
    pub id: String,
}

/// Markdown segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkdownData {
    /// Markdown source, or template parameter JSON when a template is set.
    pub content: String,
    /// Platform markdown template id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Platform keyboard template id to attach.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard_id: Option<String>,
}

/// ARK card segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArkData {
    /// ARK template id (23 = text card, 24 = link card, 37 = big image).
    pub template_id: i64,
    /// Template parameter JSON.
    pub content: String,
}

/// Keyboard segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardData {
    /// Platform keyboard template id.
    pub id: String,
}

impl Segment {
    /// Creates a plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    /// Creates a face segment.
    pub fn face(id: impl Into<String>) -> Self {
        Segment::Face(FaceData { id: id.into() })
    }

    /// Creates an image segment from a URL, path, or base64 payload.
    pub fn image(file: impl Into<String>) -> Self {
        Segment::Image(MediaData::new(file))
    }

    /// Creates a video segment.
    pub fn video(file: impl Into<String>) -> Self {
        Segment::Video(MediaData::new(file))
    }

    /// Creates a voice segment.
    pub fn voice(file: impl Into<String>) -> Self {
        Segment::Voice(MediaData::new(file))
    }

    /// Creates a file segment.
    pub fn file(file: impl Into<String>) -> Self {
        Segment::File(MediaData::new(file))
    }

    /// Creates an @mention segment.
    pub fn at(target: impl Into<String>) -> Self {
        Segment::At(AtData { qq: target.into() })
    }

    /// Creates an @all segment.
    pub fn at_all() -> Self {
        Segment::At(AtData {
            qq: "all".to_string(),
        })
    }

    /// Creates a reply segment referencing another message.
    pub fn reply(id: impl Into<String>) -> Self {
        Segment::Reply(ReplyData { id: id.into() })
    }

    /// Creates a markdown segment.
    pub fn markdown(content: impl Into<String>) -> Self {
        Segment::Markdown(MarkdownData {
            content: content.into(),
            template_id: None,
            keyboard_id: None,
        })
    }

    /// Creates an ARK card segment.
    pub fn ark(template_id: i64, content: impl Into<String>) -> Self {
        Segment::Ark(ArkData {
            template_id,
            content: content.into(),
        })
    }

    /// Returns the segment type identifier (`"text"`, `"image"`, ...).
    pub fn segment_type(&self) -> &'static str {
        match self {
            Segment::Text(_) => "text",
            Segment::Face(_) => "face",
            Segment::Image(_) => "image",
            Segment::Video(_) => "video",
            Segment::Voice(_) => "voice",
            Segment::File(_) => "file",
            Segment::At(_) => "at",
            Segment::Reply(_) => "reply",
            Segment::Markdown(_) => "markdown",
            Segment::Ark(_) => "ark",
            Segment::Keyboard(_) => "keyboard",
        }
    }

    /// Returns true if this is a plain text segment.
    pub fn is_text(&self) -> bool {
        matches!(self, Segment::Text(_))
    }

    /// Returns the text content if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(data) => Some(&data.text),
            _ => None,
        }
    }

    /// Returns the media payload for image/video/voice/file segments.
    pub fn media(&self) -> Option<&MediaData> {
        match self {
            Segment::Image(d) | Segment::Video(d) | Segment::Voice(d) | Segment::File(d) => {
                Some(d)
            }
            _ => None,
        }
    }

    /// Returns true for media segments that still lack an upload handle.
    ///
    /// Protocols with a two-step media send consult this flag to decide
    /// whether an upload call must precede the message send.
    pub fn needs_upload(&self) -> bool {
        self.media().is_some_and(|m| m.file_info.is_none())
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Text(data) => write!(f, "{}", data.text),
            Segment::Face(data) => write!(f, "[face:{}]", data.id),
            Segment::Image(data) => write!(f, "[image:{}]", data.file),
            Segment::Video(data) => write!(f, "[video:{}]", data.file),
            Segment::Voice(data) => write!(f, "[voice:{}]", data.file),
            Segment::File(data) => write!(f, "[file:{}]", data.file),
            Segment::At(data) => write!(f, "@{}", data.qq),
            Segment::Reply(data) => write!(f, "[reply:{}]", data.id),
            Segment::Markdown(_) => write!(f, "[markdown]"),
            Segment::Ark(data) => write!(f, "[ark:{}]", data.template_id),
            Segment::Keyboard(data) => write!(f, "[keyboard:{}]", data.id),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of message segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message from a list of segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Creates a single-segment text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::text(text)],
        }
    }

    /// Appends a segment.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Returns an iterator over the segments.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the message has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the segments as a slice.
    pub fn as_slice(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the segments as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// Concatenates the text content of all text segments, ignoring other
    /// segment kinds.
    pub fn extract_plain_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(Segment::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Returns true if any segment is an image.
    pub fn has_image(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Image(_)))
    }

    /// Returns true if any segment is an @mention.
    pub fn has_at(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::At(_)))
    }

    /// Gets the replied-to message id if this message carries a reply segment.
    pub fn reply_to(&self) -> Option<&str> {
        self.segments.iter().find_map(|seg| {
            if let Segment::Reply(data) = seg {
                Some(data.id.as_str())
            } else {
                None
            }
        })
    }

    /// Converts the message to its CQ-code string form.
    pub fn to_cq_string(&self) -> String {
        self.segments.iter().map(Segment::to_cq_code).collect()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for seg in &self.segments {
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl Extend<Segment> for Message {
    fn extend<I: IntoIterator<Item = Segment>>(&mut self, iter: I) {
        self.segments.extend(iter);
    }
}

impl std::ops::Add for Message {
    type Output = Message;

    fn add(mut self, rhs: Message) -> Message {
        self.segments.extend(rhs.segments);
        self
    }
}

impl std::ops::Index<usize> for Message {
    type Output = Segment;

    fn index(&self, index: usize) -> &Segment {
        &self.segments[index]
    }
}

impl IntoIterator for Message {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

// ============================================================================
// CQ Code Conversion
// ============================================================================

impl Segment {
    /// Converts this segment to its CQ code form.
    ///
    /// Text segments are emitted as escaped plain text. Voice segments map to
    /// the wire name `record`. Segments with no CQ representation (markdown,
    /// ark, keyboard) fall back to `[CQ:json,...]`-free display text.
    pub fn to_cq_code(&self) -> String {
        match self {
            Segment::Text(data) => escape_cq_text(&data.text),
            Segment::Face(data) => format!("[CQ:face,id={}]", escape_cq_value(&data.id)),
            Segment::Image(data) => media_cq("image", data),
            Segment::Video(data) => media_cq("video", data),
            Segment::Voice(data) => media_cq("record", data),
            Segment::File(data) => media_cq("file", data),
            Segment::At(data) => format!("[CQ:at,qq={}]", escape_cq_value(&data.qq)),
            Segment::Reply(data) => format!("[CQ:reply,id={}]", escape_cq_value(&data.id)),
            // No CQ form exists for these; display text keeps logs readable.
            Segment::Markdown(_) | Segment::Ark(_) | Segment::Keyboard(_) => self.to_string(),
        }
    }
}

fn media_cq(kind: &str, data: &MediaData) -> String {
    let mut cq = format!("[CQ:{kind},file={}", escape_cq_value(&data.file));
    if let Some(ref url) = data.url {
        write!(cq, ",url={}", escape_cq_value(url)).ok();
    }
    cq.push(']');
    cq
}

/// Escapes special characters in plain text for CQ code format.
///
/// Escapes: `&` → `&amp;`, `[` → `&#91;`, `]` → `&#93;`
pub fn escape_cq_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

/// Unescapes CQ code special characters back to plain text.
pub fn unescape_cq_text(text: &str) -> String {
    text.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

/// Escapes special characters in CQ code parameter values.
pub fn escape_cq_value(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
        .replace(',', "&#44;")
}

/// Unescapes CQ code parameter value special characters.
pub fn unescape_cq_value(value: &str) -> String {
    unescape_cq_text(value)
}

/// Parses a CQ code string into a message.
///
/// Handles the mixed form where plain text and `[CQ:...]` codes alternate:
///
/// ```text
/// Hello [CQ:face,id=178] World [CQ:at,qq=10001000]
/// ```
pub fn parse_cq_string(input: &str) -> Message {
    let mut segments = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut pos = 0;

    while pos < len {
        if pos + 4 <= len && chars[pos..pos + 4] == ['[', 'C', 'Q', ':'] {
            let start = pos;
            pos += 4;

            let func_start = pos;
            while pos < len && chars[pos] != ',' && chars[pos] != ']' {
                pos += 1;
            }
            let func_name: String = chars[func_start..pos].iter().collect();

            let mut params: Vec<(String, String)> = Vec::new();
            while pos < len && chars[pos] == ',' {
                pos += 1;

                let param_start = pos;
                while pos < len && chars[pos] != '=' && chars[pos] != ']' {
                    pos += 1;
                }
                let param_name: String = chars[param_start..pos].iter().collect();

                if pos < len && chars[pos] == '=' {
                    pos += 1;
                    let value_start = pos;
                    while pos < len && chars[pos] != ',' && chars[pos] != ']' {
                        pos += 1;
                    }
                    let param_value: String = chars[value_start..pos].iter().collect();
                    params.push((param_name, unescape_cq_value(&param_value)));
                }
            }

            if pos < len && chars[pos] == ']' {
                pos += 1;
            }

            if let Some(segment) = cq_to_segment(&func_name, &params) {
                segments.push(segment);
            } else {
                // Unknown CQ code, keep it as literal text.
                let text: String = chars[start..pos].iter().collect();
                segments.push(Segment::text(text));
            }
        } else {
            let start = pos;
            while pos < len && !(pos + 4 <= len && chars[pos..pos + 4] == ['[', 'C', 'Q', ':']) {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            let text = unescape_cq_text(&text);
            if !text.is_empty() {
                segments.push(Segment::text(text));
            }
        }
    }

    Message::from_segments(segments)
}

fn cq_to_segment(func: &str, params: &[(String, String)]) -> Option<Segment> {
    fn get<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
    fn media(params: &[(String, String)]) -> Option<MediaData> {
        Some(MediaData {
            file: get(params, "file")?.to_string(),
            url: get(params, "url").map(ToString::to_string),
            file_info: None,
        })
    }

    match func {
        "face" => Some(Segment::Face(FaceData {
            id: get(params, "id")?.to_string(),
        })),
        "image" => Some(Segment::Image(media(params)?)),
        "video" => Some(Segment::Video(media(params)?)),
        "record" => Some(Segment::Voice(media(params)?)),
        "file" => Some(Segment::File(media(params)?)),
        "at" => Some(Segment::At(AtData {
            qq: get(params, "qq")?.to_string(),
        })),
        "reply" => Some(Segment::Reply(ReplyData {
            id: get(params, "id")?.to_string(),
        })),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_serialize() {
        let text = Segment::text("Hello");
        let json = serde_json::to_string(&text).unwrap();
        assert_eq!(json, r#"{"type":"text","data":{"text":"Hello"}}"#);

        let at = Segment::at("10001000");
        let json = serde_json::to_string(&at).unwrap();
        assert_eq!(json, r#"{"type":"at","data":{"qq":"10001000"}}"#);
    }

    #[test]
    fn test_segment_deserialize() {
        let json = r#"{"type":"image","data":{"file":"123.jpg","url":"http://example.com/1.jpg"}}"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        assert!(
            matches!(segment, Segment::Image(MediaData { file, url: Some(_), .. }) if file == "123.jpg")
        );

        let json = r#"{"type":"at","data":{"qq":"all"}}"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        assert!(matches!(segment, Segment::At(AtData { qq }) if qq == "all"));
    }

    #[test]
    fn test_plain_text_extraction() {
        let msg = Message::from_segments(vec![
            Segment::text("Hello, "),
            Segment::at("10001000"),
            Segment::text("!"),
        ]);
        assert_eq!(msg.len(), 3);
        assert_eq!(msg.extract_plain_text(), "Hello, !");
        assert!(msg.has_at());
        assert!(!msg.has_image());
    }

    #[test]
    fn test_message_concat() {
        let a = Message::text("one");
        let b = Message::from_segments(vec![Segment::face("1")]);
        let joined = a + b;
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn test_cq_round_trip() {
        let msg = Message::from_segments(vec![
            Segment::reply("12345"),
            Segment::text("Hello "),
            Segment::face("178"),
            Segment::image("http://example.com/1.jpg"),
            Segment::at("10001000"),
            Segment::text(" [brackets] & ampersand"),
        ]);
        let wire = msg.to_cq_string();
        let parsed = parse_cq_string(&wire);
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_parse_cq_string() {
        let msg = parse_cq_string("Hello [CQ:face,id=178] World");
        assert_eq!(msg.len(), 3);
        assert!(matches!(&msg[0], Segment::Text(TextData { text }) if text == "Hello "));
        assert!(matches!(&msg[1], Segment::Face(_)));
        assert!(matches!(&msg[2], Segment::Text(TextData { text }) if text == " World"));
    }

    #[test]
    fn test_parse_cq_unknown_code_kept_as_text() {
        let msg = parse_cq_string("[CQ:dice]");
        assert_eq!(msg.len(), 1);
        assert!(matches!(&msg[0], Segment::Text(TextData { text }) if text == "[CQ:dice]"));
    }

    #[test]
    fn test_voice_maps_to_record_on_wire() {
        let msg = Message::from_segments(vec![Segment::voice("a.mp3")]);
        assert_eq!(msg.to_cq_string(), "[CQ:record,file=a.mp3]");
        assert_eq!(parse_cq_string("[CQ:record,file=a.mp3]"), msg);
    }

    #[test]
    fn test_needs_upload() {
        let seg = Segment::image("http://example.com/1.jpg");
        assert!(seg.needs_upload());

        let uploaded = Segment::Image(MediaData {
            file: "http://example.com/1.jpg".into(),
            url: None,
            file_info: Some("handle".into()),
        });
        assert!(!uploaded.needs_upload());
        assert!(!Segment::text("x").needs_upload());
    }

    #[test]
    fn test_cq_escaping() {
        assert_eq!(escape_cq_text("Hello [World]"), "Hello &#91;World&#93;");
        assert_eq!(unescape_cq_text("&#91;x&#93; &amp;"), "[x] &");
        assert_eq!(escape_cq_value("a,b,c"), "a&#44;b&#44;c");
    }
}

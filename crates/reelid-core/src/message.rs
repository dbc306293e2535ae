//! Typed inbound direct messages.
//!
//! The realtime feed delivers loosely-shaped JSON. It is validated into [`InboundMessage`] at the
//! transport boundary so the dispatcher only ever matches on known variants.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{ItemId, ThreadId, UserId},
    errors::Error,
    Result,
};

/// Kind of content carried by a message item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemType {
    Clip,
    MediaShare,
    Other(String),
}

impl ItemType {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "clip" => ItemType::Clip,
            "media_share" => ItemType::MediaShare,
            other => ItemType::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            ItemType::Clip => "clip",
            ItemType::MediaShare => "media_share",
            ItemType::Other(s) => s,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// What happened to the item in its thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOp {
    /// A newly inserted message.
    Add,
    Remove,
    Other(String),
}

impl MessageOp {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "add" => MessageOp::Add,
            "remove" => MessageOp::Remove,
            other => MessageOp::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            MessageOp::Add => "add",
            MessageOp::Remove => "remove",
            MessageOp::Other(s) => s,
        }
    }
}

impl fmt::Display for MessageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCandidate {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVersions {
    #[serde(default)]
    pub candidates: Vec<ImageCandidate>,
}

/// A media object (post, reel) as embedded in a message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub image_versions2: Option<ImageVersions>,
}

/// Clip items wrap the actual media one level deeper (`clip.clip`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipShare {
    #[serde(default)]
    pub clip: Option<MediaItem>,
}

/// One inbound direct message.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub thread_id: ThreadId,
    pub item_id: ItemId,
    pub item_type: ItemType,
    pub user_id: Option<UserId>,
    pub op: MessageOp,
    pub clip: Option<ClipShare>,
    pub media_share: Option<MediaItem>,
    /// Untouched payload, kept for debug dumps only.
    pub raw: Value,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    thread_id: Option<Value>,
    #[serde(default)]
    item_id: Option<Value>,
    #[serde(default)]
    item_type: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    clip: Option<ClipShare>,
    #[serde(default)]
    media_share: Option<MediaItem>,
}

impl InboundMessage {
    /// Parse a realtime `message` event payload.
    ///
    /// Accepts both the `{ "message": { .. } }` wrapper and a bare message object.
    pub fn from_realtime(data: &Value) -> Result<Self> {
        let raw = data.get("message").unwrap_or(data).clone();
        let wire: WireMessage = serde_json::from_value(raw.clone())?;

        let thread_id = wire
            .thread_id
            .as_ref()
            .and_then(id_string)
            .ok_or_else(|| Error::External("message without thread_id".to_string()))?;
        let item_id = wire.item_id.as_ref().and_then(id_string).unwrap_or_default();
        let user_id = wire.user_id.as_ref().and_then(id_i64).map(UserId);

        Ok(Self {
            thread_id: ThreadId(thread_id),
            item_id: ItemId(item_id),
            item_type: ItemType::from_wire(wire.item_type.as_deref().unwrap_or("")),
            user_id,
            op: MessageOp::from_wire(wire.op.as_deref().unwrap_or("")),
            clip: wire.clip,
            media_share: wire.media_share,
            raw,
        })
    }
}

/// Ids arrive as strings or numbers depending on the topic.
fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wrapped_clip_message() {
        let data = json!({
            "message": {
                "thread_id": "340282366841710300949128",
                "item_id": "3162",
                "item_type": "clip",
                "user_id": 42,
                "op": "add",
                "clip": { "clip": { "image_versions2": { "candidates": [
                    { "url": "https://cdn/a.jpg", "width": 640, "height": 1136 }
                ] } } }
            }
        });

        let msg = InboundMessage::from_realtime(&data).unwrap();
        assert_eq!(msg.thread_id, ThreadId("340282366841710300949128".to_string()));
        assert_eq!(msg.item_type, ItemType::Clip);
        assert_eq!(msg.op, MessageOp::Add);
        assert_eq!(msg.user_id, Some(UserId(42)));
        let candidates = &msg
            .clip
            .unwrap()
            .clip
            .unwrap()
            .image_versions2
            .unwrap()
            .candidates;
        assert_eq!(candidates[0].url, "https://cdn/a.jpg");
    }

    #[test]
    fn keeps_unknown_types_and_ops() {
        let data = json!({
            "thread_id": 7,
            "item_id": "1",
            "item_type": "voice_media",
            "user_id": "99",
            "op": "replace"
        });

        let msg = InboundMessage::from_realtime(&data).unwrap();
        assert_eq!(msg.thread_id, ThreadId("7".to_string()));
        assert_eq!(msg.user_id, Some(UserId(99)));
        assert_eq!(msg.item_type, ItemType::Other("voice_media".to_string()));
        assert_eq!(msg.op, MessageOp::Other("replace".to_string()));
    }

    #[test]
    fn missing_user_id_is_none() {
        let data = json!({ "message": { "thread_id": "t", "item_type": "text", "op": "add" } });
        let msg = InboundMessage::from_realtime(&data).unwrap();
        assert!(msg.user_id.is_none());
    }

    #[test]
    fn rejects_message_without_thread() {
        let data = json!({ "message": { "item_id": "1", "op": "add" } });
        assert!(InboundMessage::from_realtime(&data).is_err());
    }
}

use tracing::error;

use crate::message::{InboundMessage, ItemType, MediaItem};

/// Resolve the image URL the classifier should look at.
///
/// Clips and shared posts use the first (largest) image candidate; any other item type has no
/// usable media.
pub fn extract_media_url(message: &InboundMessage) -> Option<String> {
    match &message.item_type {
        ItemType::Clip => message
            .clip
            .as_ref()
            .and_then(|c| c.clip.as_ref())
            .and_then(first_candidate),
        ItemType::MediaShare => message.media_share.as_ref().and_then(first_candidate),
        ItemType::Other(kind) => {
            error!(
                "[{}] Unsupported message item type {kind}",
                message.thread_id
            );
            None
        }
    }
}

fn first_candidate(media: &MediaItem) -> Option<String> {
    media
        .image_versions2
        .as_ref()?
        .candidates
        .first()
        .map(|c| c.url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(v: serde_json::Value) -> InboundMessage {
        InboundMessage::from_realtime(&v).unwrap()
    }

    #[test]
    fn clip_takes_first_candidate() {
        let m = message(json!({
            "thread_id": "t", "item_type": "clip", "op": "add", "user_id": 1,
            "clip": { "clip": { "image_versions2": { "candidates": [
                { "url": "u1" }, { "url": "u2" }
            ] } } }
        }));
        assert_eq!(extract_media_url(&m).as_deref(), Some("u1"));
    }

    #[test]
    fn clip_without_inner_media_is_none() {
        let m = message(json!({
            "thread_id": "t", "item_type": "clip", "op": "add", "clip": {}
        }));
        assert_eq!(extract_media_url(&m), None);

        let m = message(json!({ "thread_id": "t", "item_type": "clip", "op": "add" }));
        assert_eq!(extract_media_url(&m), None);
    }

    #[test]
    fn media_share_with_empty_candidates_is_none() {
        let m = message(json!({
            "thread_id": "t", "item_type": "media_share", "op": "add",
            "media_share": { "image_versions2": { "candidates": [] } }
        }));
        assert_eq!(extract_media_url(&m), None);
    }

    #[test]
    fn media_share_takes_first_candidate() {
        let m = message(json!({
            "thread_id": "t", "item_type": "media_share", "op": "add",
            "media_share": { "image_versions2": { "candidates": [ { "url": "https://img/x.png" } ] } }
        }));
        assert_eq!(extract_media_url(&m).as_deref(), Some("https://img/x.png"));
    }

    #[test]
    fn unsupported_type_is_none() {
        let m = message(json!({
            "thread_id": "t", "item_type": "text", "op": "add",
            "media_share": { "image_versions2": { "candidates": [ { "url": "ignored" } ] } }
        }));
        assert_eq!(extract_media_url(&m), None);
    }
}

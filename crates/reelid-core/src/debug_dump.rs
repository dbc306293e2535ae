use std::path::PathBuf;

use crate::{message::InboundMessage, Result};

/// Writes raw inbound messages to `<root>/<thread_id>/<item_id>_<item_type>.json`.
///
/// Only enabled with `DEBUG`; used to collect sample payloads.
#[derive(Clone, Debug)]
pub struct DebugDump {
    root: PathBuf,
}

impl DebugDump {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, message: &InboundMessage) -> PathBuf {
        self.root
            .join(sanitize(&message.thread_id.0))
            .join(format!(
                "{}_{}.json",
                sanitize(&message.item_id.0),
                sanitize(message.item_type.as_wire())
            ))
    }

    pub async fn save(&self, message: &InboundMessage) -> Result<PathBuf> {
        let path = self.path_for(message);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_string(&message.raw)?).await?;
        Ok(path)
    }
}

/// Ids come from the network; keep them to a single path component.
fn sanitize(s: &str) -> String {
    let out: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

//! Hexagonal ports.
//!
//! The account client, the direct-messaging API, the realtime feed and the vision model are
//! external collaborators. Adapter crates implement these traits; the core only talks to them
//! through here.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    domain::{Friendship, InboxCursor, PendingThread, ThreadId, UserId},
    message::InboundMessage,
    Result,
};

/// Account/session client: device identity, login, opaque serializable state.
#[async_trait]
pub trait AccountPort: Send + Sync {
    /// Derive a stable device identity from `seed` (usually the username).
    fn generate_device(&self, seed: &str);

    /// Requests a real app makes before showing the login screen.
    async fn pre_login_flow(&self) -> Result<()>;

    /// Log in and return the account's own user id.
    async fn login(&self, username: &str, password: &str) -> Result<UserId>;

    /// Snapshot of the client state, suitable for the session store.
    async fn serialize_state(&self) -> Result<Value>;

    /// Restore a snapshot taken with [`AccountPort::serialize_state`].
    async fn deserialize_state(&self, state: Value) -> Result<()>;

    /// Fires once after every outbound request completes.
    fn subscribe_request_end(&self) -> broadcast::Receiver<()>;
}

/// Direct-messaging operations the bot performs.
#[async_trait]
pub trait DirectPort: Send + Sync {
    /// Open (or reuse) the one-to-one thread with `user` and send `text`.
    async fn broadcast_text(&self, user: UserId, text: &str) -> Result<()>;

    async fn friendship(&self, user: UserId) -> Result<Friendship>;

    /// Conversation invites waiting for approval.
    async fn pending_threads(&self) -> Result<Vec<PendingThread>>;

    async fn approve_thread(&self, thread: &ThreadId) -> Result<()>;

    /// Current inbox snapshot cursor, used to resume the realtime feed.
    async fn inbox_cursor(&self) -> Result<InboxCursor>;
}

/// Events delivered by the realtime transport.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    Message(Box<InboundMessage>),
    /// Anything received without a more specific event.
    Receive { topic: Value, payload: Value },
    Direct(Value),
    Error(String),
    Close,
}

/// Realtime feed connection. Events are delivered on the channel handed out by the adapter.
#[async_trait]
pub trait RealtimePort: Send + Sync {
    async fn connect(&self, cursor: &InboxCursor) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

/// Vision classification of a media URL.
///
/// Implementations swallow and log their own failures; `None` means no usable result.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, url: &str) -> Option<String>;
}

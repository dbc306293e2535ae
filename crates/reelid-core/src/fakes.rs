//! In-memory port implementations for tests.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Notify};

use crate::{
    domain::{Friendship, InboxCursor, PendingThread, ThreadId, UserId},
    errors::Error,
    ports::{AccountPort, Classifier, DirectPort, RealtimePort},
    Result,
};

#[derive(Default)]
pub struct FakeDirect {
    followers: Mutex<HashSet<UserId>>,
    sent: Mutex<Vec<(UserId, String)>>,
    pending: Mutex<Vec<PendingThread>>,
    approved: Mutex<Vec<ThreadId>>,
    failing_approvals: Mutex<HashSet<ThreadId>>,
    friendship_calls: AtomicUsize,
    pending_calls: AtomicUsize,
    cursor_calls: AtomicUsize,
    fail_sends: AtomicBool,
    fail_friendship: AtomicBool,
}

impl FakeDirect {
    pub fn set_follower(&self, user: UserId, follows: bool) {
        let mut f = self.followers.lock().unwrap();
        if follows {
            f.insert(user);
        } else {
            f.remove(&user);
        }
    }

    pub fn set_pending(&self, threads: Vec<PendingThread>) {
        *self.pending.lock().unwrap() = threads;
    }

    pub fn fail_approval(&self, thread: ThreadId) {
        self.failing_approvals.lock().unwrap().insert(thread);
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_friendship(&self) {
        self.fail_friendship.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn approved(&self) -> Vec<ThreadId> {
        self.approved.lock().unwrap().clone()
    }

    pub fn friendship_calls(&self) -> usize {
        self.friendship_calls.load(Ordering::SeqCst)
    }

    pub fn pending_calls(&self) -> usize {
        self.pending_calls.load(Ordering::SeqCst)
    }

    pub fn cursor_calls(&self) -> usize {
        self.cursor_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.sent.lock().unwrap().len()
            + self.approved.lock().unwrap().len()
            + self.friendship_calls()
            + self.pending_calls()
            + self.cursor_calls()
    }
}

#[async_trait]
impl DirectPort for FakeDirect {
    async fn broadcast_text(&self, user: UserId, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((user, text.to_string()));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("send failed".to_string()));
        }
        Ok(())
    }

    async fn friendship(&self, user: UserId) -> Result<Friendship> {
        self.friendship_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_friendship.load(Ordering::SeqCst) {
            return Err(Error::External("friendship lookup failed".to_string()));
        }
        Ok(Friendship {
            followed_by: self.followers.lock().unwrap().contains(&user),
            following: false,
        })
    }

    async fn pending_threads(&self) -> Result<Vec<PendingThread>> {
        self.pending_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn approve_thread(&self, thread: &ThreadId) -> Result<()> {
        if self.failing_approvals.lock().unwrap().contains(thread) {
            return Err(Error::External(format!("approve {thread} failed")));
        }
        self.approved.lock().unwrap().push(thread.clone());
        Ok(())
    }

    async fn inbox_cursor(&self) -> Result<InboxCursor> {
        let n = self.cursor_calls.fetch_add(1, Ordering::SeqCst) as i64;
        Ok(InboxCursor {
            seq_id: 100 + n,
            snapshot_at_ms: 1_700_000_000_000,
        })
    }
}

pub struct FakeClassifier {
    answer: Option<String>,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl FakeClassifier {
    pub fn answering(text: &str) -> Self {
        Self {
            answer: Some(text.to_string()),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Answers only after the returned `Notify` fires.
    pub fn gated(text: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                gate: Some(gate.clone()),
                ..Self::answering(text)
            },
            gate,
        )
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, url: &str) -> Option<String> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.answer.clone()
    }
}

pub struct FakeAccount {
    pub user_id: UserId,
    state: Mutex<Value>,
    log: Mutex<Vec<String>>,
    request_end: broadcast::Sender<()>,
    reject_state: bool,
}

impl FakeAccount {
    pub fn new(user_id: UserId) -> Self {
        let (request_end, _) = broadcast::channel(16);
        Self {
            user_id,
            state: Mutex::new(Value::Null),
            log: Mutex::new(Vec::new()),
            request_end,
            reject_state: false,
        }
    }

    /// `deserialize_state` fails as it would for a blob written by an older build.
    pub fn rejecting_state(mut self) -> Self {
        self.reject_state = true;
        self
    }

    pub fn with_state(self, state: Value) -> Self {
        *self.state.lock().unwrap() = state;
        self
    }

    /// Simulate a completed outbound request.
    pub fn finish_request(&self) {
        let _ = self.request_end.send(());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn state(&self) -> Value {
        self.state.lock().unwrap().clone()
    }

    fn record(&self, s: impl Into<String>) {
        self.log.lock().unwrap().push(s.into());
    }
}

#[async_trait]
impl AccountPort for FakeAccount {
    fn generate_device(&self, seed: &str) {
        self.record(format!("generate_device:{seed}"));
    }

    async fn pre_login_flow(&self) -> Result<()> {
        self.record("pre_login_flow");
        Ok(())
    }

    async fn login(&self, username: &str, password: &str) -> Result<UserId> {
        self.record(format!("login:{username}"));
        if password.is_empty() {
            return Err(Error::Auth("bad password".to_string()));
        }
        Ok(self.user_id)
    }

    async fn serialize_state(&self) -> Result<Value> {
        Ok(self.state())
    }

    async fn deserialize_state(&self, state: Value) -> Result<()> {
        self.record("deserialize_state");
        if self.reject_state {
            return Err(Error::External(format!("incompatible state {state}")));
        }
        *self.state.lock().unwrap() = state;
        Ok(())
    }

    fn subscribe_request_end(&self) -> broadcast::Receiver<()> {
        self.request_end.subscribe()
    }
}

#[derive(Default)]
pub struct FakeRealtime {
    log: Mutex<Vec<String>>,
}

impl FakeRealtime {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimePort for FakeRealtime {
    async fn connect(&self, cursor: &InboxCursor) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("connect:{}", cursor.seq_id));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.log.lock().unwrap().push("disconnect".to_string());
        Ok(())
    }
}

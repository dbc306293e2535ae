//! Bot lifecycle: login, session persistence, realtime event loop and timers.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde_json::Value;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc, Mutex},
    task::{JoinHandle, JoinSet},
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    dispatcher::{DispatchConfig, MessageDispatcher},
    domain::UserId,
    pending::PendingApprover,
    ports::{AccountPort, Classifier, DirectPort, RealtimePort, TransportEvent},
    session_store::SessionStore,
    Result,
};

/// Key of the client-state snapshot holding app version info. Never persisted so the
/// client's built-in values are always used after an upgrade.
const STATE_CONSTANTS_KEY: &str = "constants";

pub struct ChatBot {
    cfg: Arc<Config>,
    account_id: UserId,
    direct: Arc<dyn DirectPort>,
    realtime: Arc<dyn RealtimePort>,
    dispatcher: Arc<MessageDispatcher>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconnect_started: AtomicBool,
}

impl ChatBot {
    /// Log in (restoring a saved session when present), then start the pending approver.
    pub async fn create(
        cfg: Arc<Config>,
        account: Arc<dyn AccountPort>,
        direct: Arc<dyn DirectPort>,
        realtime: Arc<dyn RealtimePort>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        account.generate_device(&cfg.ig_username);
        account.pre_login_flow().await?;

        let sessions = SessionStore::new(cfg.session_file.clone());
        tasks.push(spawn_session_saver(
            account.clone(),
            sessions.clone(),
            cancel.clone(),
        ));
        match sessions.load().await {
            Ok(Some(blob)) => {
                if let Err(e) = account.deserialize_state(blob).await {
                    warn!("Ignoring incompatible session: {e}");
                }
            }
            Ok(None) => info!("No saved session found"),
            Err(e) => warn!("Ignoring unreadable session file: {e}"),
        }

        let account_id = account.login(&cfg.ig_username, &cfg.ig_password).await?;
        info!("Client initialized with user id {account_id}");

        let dispatcher = Arc::new(MessageDispatcher::new(
            account_id,
            direct.clone(),
            classifier,
            DispatchConfig::from(cfg.as_ref()),
        ));

        tasks.push(
            PendingApprover::new(direct.clone(), cfg.pending_interval).spawn(cancel.clone()),
        );

        Ok(Self {
            cfg,
            account_id,
            direct,
            realtime,
            dispatcher,
            cancel,
            tasks: Mutex::new(tasks),
            reconnect_started: AtomicBool::new(false),
        })
    }

    pub fn account_id(&self) -> UserId {
        self.account_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connect to the realtime feed and start the periodic reconnect (once).
    pub async fn start(&self) -> Result<()> {
        connect(self.direct.as_ref(), self.realtime.as_ref()).await?;

        if !self.reconnect_started.swap(true, Ordering::SeqCst) {
            info!("Created a interval for realtime reconnect");
            let handle = spawn_reconnect_loop(
                self.direct.clone(),
                self.realtime.clone(),
                self.cfg.reconnect_interval,
                self.cfg.reconnect_pause,
                self.cancel.clone(),
            );
            self.tasks.lock().await.push(handle);
        }
        Ok(())
    }

    /// Consume transport events until the channel closes or the bot is shut down.
    ///
    /// Each message is handled in its own task; in-flight messages are awaited before returning.
    pub async fn run(&self, mut events: mpsc::Receiver<TransportEvent>) {
        let mut inflight = JoinSet::new();
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                ev = events.recv() => ev,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                TransportEvent::Message(message) => {
                    let dispatcher = self.dispatcher.clone();
                    inflight.spawn(async move {
                        let outcome = dispatcher.handle(&message).await;
                        debug!(
                            "[{}] message {} handled: {outcome:?}",
                            message.thread_id, message.item_id
                        );
                    });
                }
                TransportEvent::Receive { topic, payload } => {
                    info!("receive topic: {topic} -> message: {payload}");
                }
                TransportEvent::Direct(data) => debug!("new direct {data}"),
                TransportEvent::Error(e) => error!("Realtime error: {e}"),
                TransportEvent::Close => error!("RealtimeClient closed"),
            }

            // Reap finished handlers so the set does not grow unbounded.
            while let Some(res) = inflight.try_join_next() {
                if let Err(e) = res {
                    error!("Message handler task failed: {e}");
                }
            }
        }

        while let Some(res) = inflight.join_next().await {
            if let Err(e) = res {
                error!("Message handler task failed: {e}");
            }
        }
    }

    /// Stop timers and the approver, then disconnect from the realtime feed.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for handle in tasks {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {e}");
            }
        }
        if let Err(e) = self.realtime.disconnect().await {
            warn!("Realtime disconnect failed: {e}");
        }
        info!("Disconnected from realtime");
    }
}

async fn connect(direct: &dyn DirectPort, realtime: &dyn RealtimePort) -> Result<()> {
    let cursor = direct.inbox_cursor().await?;
    realtime.connect(&cursor).await?;
    info!("Connected to realtime");
    Ok(())
}

/// Save the client state after every completed request.
fn spawn_session_saver(
    account: Arc<dyn AccountPort>,
    sessions: SessionStore,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = account.subscribe_request_end();
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                r = rx.recv() => r,
            };
            match next {
                Ok(()) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }

            let state = match account.serialize_state().await {
                Ok(v) => strip_constants(v),
                Err(e) => {
                    warn!("Failed to serialize session: {e}");
                    continue;
                }
            };
            if let Err(e) = sessions.save(&state).await {
                warn!("Error writing session file: {e}");
            }
        }
    })
}

fn strip_constants(mut state: Value) -> Value {
    if let Value::Object(map) = &mut state {
        map.remove(STATE_CONSTANTS_KEY);
    }
    state
}

/// Periodic disconnect/reconnect of the realtime feed, independent of connection health.
fn spawn_reconnect_loop(
    direct: Arc<dyn DirectPort>,
    realtime: Arc<dyn RealtimePort>,
    every: std::time::Duration,
    pause: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = realtime.disconnect().await {
                error!("Failed to reconnect: {e}");
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(pause) => {}
            }
            if let Err(e) = connect(direct.as_ref(), realtime.as_ref()).await {
                error!("Failed to reconnect: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fakes::{FakeAccount, FakeClassifier, FakeDirect, FakeRealtime},
        message::InboundMessage,
    };
    use serde_json::json;
    use std::{collections::HashMap, path::Path, time::Duration};

    fn config(session_file: &Path) -> Arc<Config> {
        let mut env = HashMap::new();
        env.insert("IG_USERNAME", "moviebot".to_string());
        env.insert("IG_PASSWORD", "secret".to_string());
        env.insert("SESSION_FILE", session_file.display().to_string());
        Arc::new(Config::from_lookup(|k| env.get(k).cloned()).unwrap())
    }

    struct Harness {
        account: Arc<FakeAccount>,
        direct: Arc<FakeDirect>,
        realtime: Arc<FakeRealtime>,
        bot: ChatBot,
    }

    async fn harness(session_file: &Path, account: FakeAccount) -> Harness {
        let account = Arc::new(account);
        let direct = Arc::new(FakeDirect::default());
        let realtime = Arc::new(FakeRealtime::default());
        let bot = ChatBot::create(
            config(session_file),
            account.clone(),
            direct.clone(),
            realtime.clone(),
            Arc::new(FakeClassifier::answering("Movie Name: Foo")),
        )
        .await
        .unwrap();
        Harness {
            account,
            direct,
            realtime,
            bot,
        }
    }

    #[tokio::test]
    async fn login_flow_order_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(&dir.path().join("s.json"), FakeAccount::new(UserId(77))).await;

        assert_eq!(h.bot.account_id(), UserId(77));
        assert_eq!(
            h.account.log(),
            vec!["generate_device:moviebot", "pre_login_flow", "login:moviebot"]
        );
        h.bot.shutdown().await;
    }

    #[tokio::test]
    async fn saved_session_is_restored_before_login() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("s.json");
        SessionStore::new(&file)
            .save(&json!({ "authorization": "Bearer x" }))
            .await
            .unwrap();

        let h = harness(&file, FakeAccount::new(UserId(1))).await;
        assert_eq!(
            h.account.log(),
            vec![
                "generate_device:moviebot",
                "pre_login_flow",
                "deserialize_state",
                "login:moviebot"
            ]
        );
        assert_eq!(h.account.state(), json!({ "authorization": "Bearer x" }));
        h.bot.shutdown().await;
    }

    #[tokio::test]
    async fn incompatible_session_falls_back_to_fresh_login() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("s.json");
        SessionStore::new(&file)
            .save(&json!({ "device": "legacy-string" }))
            .await
            .unwrap();

        let h = harness(&file, FakeAccount::new(UserId(3)).rejecting_state()).await;
        assert_eq!(h.bot.account_id(), UserId(3));
        assert_eq!(
            h.account.log(),
            vec![
                "generate_device:moviebot",
                "pre_login_flow",
                "deserialize_state",
                "login:moviebot"
            ]
        );
        assert_eq!(h.account.state(), Value::Null);
        h.bot.shutdown().await;
    }

    #[tokio::test]
    async fn completed_requests_persist_state_without_constants() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session/account_session.json");
        let account = FakeAccount::new(UserId(1)).with_state(json!({
            "authorization": "Bearer y",
            "constants": { "app_version": "1.0" }
        }));
        let h = harness(&file, account).await;

        h.account.finish_request();
        let store = SessionStore::new(&file);
        let mut saved = None;
        for _ in 0..100 {
            if let Ok(Some(v)) = store.load().await {
                saved = Some(v);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(saved, Some(json!({ "authorization": "Bearer y" })));
        h.bot.shutdown().await;
    }

    #[tokio::test]
    async fn start_connects_with_inbox_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(&dir.path().join("s.json"), FakeAccount::new(UserId(1))).await;

        h.bot.start().await.unwrap();
        assert_eq!(h.realtime.log(), vec!["connect:100"]);
        h.bot.shutdown().await;
        assert_eq!(h.realtime.log(), vec!["connect:100", "disconnect"]);
    }

    #[tokio::test]
    async fn run_dispatches_messages_until_channel_closes() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(&dir.path().join("s.json"), FakeAccount::new(UserId(1))).await;
        h.direct.set_follower(UserId(5), true);

        let (tx, rx) = mpsc::channel(8);
        let msg = InboundMessage::from_realtime(&json!({ "message": {
            "thread_id": "t", "item_id": "i", "item_type": "media_share", "user_id": 5, "op": "add",
            "media_share": { "image_versions2": { "candidates": [ { "url": "https://img/x.png" } ] } }
        }}))
        .unwrap();
        tx.send(TransportEvent::Receive {
            topic: json!({ "id": "146" }),
            payload: json!([]),
        })
        .await
        .unwrap();
        tx.send(TransportEvent::Message(Box::new(msg))).await.unwrap();
        tx.send(TransportEvent::Close).await.unwrap();
        drop(tx);

        h.bot.run(rx).await;
        let replies: Vec<_> = h
            .direct
            .sent()
            .into_iter()
            .filter(|(u, _)| *u == UserId(5))
            .collect();
        assert_eq!(replies, vec![(UserId(5), "Movie Name: Foo".to_string())]);
        h.bot.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_on_fixed_period() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(&dir.path().join("s.json"), FakeAccount::new(UserId(1))).await;

        h.bot.start().await.unwrap();
        h.bot.start().await.unwrap();
        assert_eq!(h.realtime.log(), vec!["connect:100", "connect:101"]);

        tokio::time::sleep(Duration::from_secs(180 * 60 + 6)).await;
        assert_eq!(
            h.realtime.log(),
            vec!["connect:100", "connect:101", "disconnect", "connect:102"]
        );
        h.bot.shutdown().await;
    }
}

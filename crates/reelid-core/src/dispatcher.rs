use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    debug_dump::DebugDump,
    domain::UserId,
    media::extract_media_url,
    message::{InboundMessage, MessageOp},
    ports::{Classifier, DirectPort},
    rate_limit::RateLimiter,
    replies,
};

/// Knobs for the per-message pipeline.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Cooldown between classification requests for one user.
    pub request_delay: Duration,
    /// Send a cooldown notice when a user is rate limited.
    pub notify_limit: bool,
    /// Cooldown notices stop once a user has been denied this many times in a row.
    pub limit_retry_info: u32,
    pub notify_no_media: bool,
    pub notify_prediction_failure: bool,
    /// Raw message capture (`DEBUG`).
    pub debug_dump: Option<DebugDump>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(5 * 60),
            notify_limit: true,
            limit_retry_info: 3,
            notify_no_media: true,
            notify_prediction_failure: true,
            debug_dump: None,
        }
    }
}

impl From<&Config> for DispatchConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            request_delay: cfg.request_delay,
            notify_limit: cfg.notify_limit,
            limit_retry_info: cfg.limit_retry_info,
            notify_no_media: cfg.notify_no_media,
            notify_prediction_failure: cfg.notify_prediction_failure,
            debug_dump: cfg
                .debug
                .then(|| DebugDump::new(cfg.debug_dump_dir.clone())),
        }
    }
}

/// Where the pipeline stopped for a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    NoUser,
    OwnMessage,
    IgnoredOp,
    RateLimited { notified: bool },
    NoMedia,
    NotFollowing,
    ClassificationFailed,
    Replied,
    /// An external lookup failed; nothing more was attempted.
    Failed,
}

/// Inbound message pipeline: filter, rate-limit, extract, follow-gate, classify, reply.
pub struct MessageDispatcher {
    account_id: UserId,
    direct: Arc<dyn DirectPort>,
    classifier: Arc<dyn Classifier>,
    limiter: Mutex<RateLimiter<UserId>>,
    cfg: DispatchConfig,
}

impl MessageDispatcher {
    pub fn new(
        account_id: UserId,
        direct: Arc<dyn DirectPort>,
        classifier: Arc<dyn Classifier>,
        cfg: DispatchConfig,
    ) -> Self {
        info!(
            "MessageHandler created with message limit as 1req/{}m",
            cfg.request_delay.as_secs() / 60
        );
        Self {
            account_id,
            direct,
            classifier,
            limiter: Mutex::new(RateLimiter::new(1, cfg.request_delay)),
            cfg,
        }
    }

    pub fn account_id(&self) -> UserId {
        self.account_id
    }

    pub async fn handle(&self, message: &InboundMessage) -> DispatchOutcome {
        let Some(user_id) = message.user_id else {
            info!("No user id found for the message");
            return DispatchOutcome::NoUser;
        };
        if user_id == self.account_id {
            info!("Skipping message same user id");
            return DispatchOutcome::OwnMessage;
        }
        if message.op != MessageOp::Add {
            info!(
                "Got new message with op {} from {}",
                message.op, message.thread_id
            );
            return DispatchOutcome::IgnoredOp;
        }

        if let Some(dump) = &self.cfg.debug_dump {
            match dump.save(message).await {
                Ok(path) => info!("Saved raw message to {}", path.display()),
                Err(e) => warn!("Failed to save raw message: {e}"),
            }
        }
        info!("Got new message from {user_id}");

        let consumed = { self.limiter.lock().await.consume(user_id) };
        if let Err(rejected) = consumed {
            error!("Too many requests {user_id} error: {rejected}");
            let notify =
                self.cfg.notify_limit && rejected.consumed_points < self.cfg.limit_retry_info;
            if notify {
                self.send(
                    user_id,
                    &replies::cooldown_message(rejected.seconds_before_next()),
                )
                .await;
            }
            return DispatchOutcome::RateLimited { notified: notify };
        }

        let Some(media_url) = extract_media_url(message) else {
            info!("[{}] No sprite URL found for the clip.", message.thread_id);
            if self.cfg.notify_no_media {
                self.send(user_id, replies::MEDIA_NOT_FOUND_MESSAGE).await;
            }
            return DispatchOutcome::NoMedia;
        };

        let friendship = match self.direct.friendship(user_id).await {
            Ok(f) => f,
            Err(e) => {
                error!("Friendship lookup failed for user {user_id}: {e}");
                return DispatchOutcome::Failed;
            }
        };
        if !friendship.followed_by {
            info!("User {user_id} is not following the account");
            self.send(user_id, &replies::welcome_message(self.cfg.request_delay))
                .await;
            return DispatchOutcome::NotFollowing;
        }

        let Some(prediction) = self.classifier.classify(&media_url).await else {
            error!("Prediction failed for user {user_id}");
            if self.cfg.notify_prediction_failure {
                self.send(user_id, replies::PREDICTION_FAIL_MESSAGE).await;
            }
            return DispatchOutcome::ClassificationFailed;
        };

        self.send(user_id, &prediction).await;
        DispatchOutcome::Replied
    }

    async fn send(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.direct.broadcast_text(user_id, text).await {
            warn!("Failed to send message to {user_id}: {e}");
        }
    }
}

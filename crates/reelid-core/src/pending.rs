use std::{sync::Arc, time::Duration};

use tokio::{
    task::{JoinHandle, JoinSet},
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    domain::PendingThread,
    ports::DirectPort,
    replies::PENDING_APPROVED_MESSAGE,
    Result,
};

/// Approves pending conversation invites so their messages reach the realtime feed.
#[derive(Clone)]
pub struct PendingApprover {
    direct: Arc<dyn DirectPort>,
    every: Duration,
}

impl PendingApprover {
    pub fn new(direct: Arc<dyn DirectPort>, every: Duration) -> Self {
        Self { direct, every }
    }

    /// Approve every pending thread and ask each inviter to resend.
    ///
    /// Items are processed concurrently and independently; failures are logged per item.
    /// Returns the number of threads approved.
    pub async fn approve_pending(&self) -> Result<usize> {
        info!("Checking pending threads");
        let items = self.direct.pending_threads().await?;

        let mut tasks = JoinSet::new();
        for item in items {
            let direct = self.direct.clone();
            tasks.spawn(async move { approve_one(direct, item).await });
        }

        let mut approved = 0usize;
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(true) => approved += 1,
                Ok(false) => {}
                Err(e) => error!("Pending approval task failed: {e}"),
            }
        }
        Ok(approved)
    }

    /// Run [`Self::approve_pending`] now and then on every interval until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.approve_pending().await {
                            error!("Failed to fetch pending threads: {e}");
                        }
                    }
                }
            }
        })
    }
}

async fn approve_one(direct: Arc<dyn DirectPort>, item: PendingThread) -> bool {
    info!("New thread found {}", item.thread_id);
    if let Err(e) = direct.approve_thread(&item.thread_id).await {
        error!("Failed to approve thread {}: {e}", item.thread_id);
        return false;
    }
    if let Err(e) = direct
        .broadcast_text(item.inviter.pk, PENDING_APPROVED_MESSAGE)
        .await
    {
        error!("Error while responding to a user {e}");
    }
    info!("Approved the thread {}", item.thread_id);
    true
}

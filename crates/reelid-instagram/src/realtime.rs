//! Realtime feed through an external bridge process.
//!
//! The bridge owns the MQTT session and writes one JSON object per stdout line:
//! `{"event": "message" | "receive" | "direct" | "error" | "close", "data": ...}`.

use std::{
    collections::VecDeque,
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    sync::{mpsc, Mutex},
};
use tracing::{debug, info, warn};

use reelid_core::{
    domain::InboxCursor,
    errors::Error,
    message::InboundMessage,
    ports::{RealtimePort, TransportEvent},
    Result,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;
const EVENT_BUFFER: usize = 256;

pub const ENV_SEQ_ID: &str = "REELID_IRIS_SEQ_ID";
pub const ENV_SNAPSHOT_AT_MS: &str = "REELID_IRIS_SNAPSHOT_AT_MS";
pub const ENV_SESSION_FILE: &str = "REELID_SESSION_FILE";

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub session_file: PathBuf,
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            match self.lines.pop_front() {
                Some(front) => self.bytes = self.bytes.saturating_sub(front.len() + 1),
                None => break,
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

struct Running {
    child: Child,
    stopped: Arc<AtomicBool>,
}

pub struct RealtimeBridge {
    cfg: BridgeConfig,
    events: mpsc::Sender<TransportEvent>,
    running: Mutex<Option<Running>>,
}

impl RealtimeBridge {
    /// Returns the bridge and the receiving end of its event channel.
    pub fn new(cfg: BridgeConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                cfg,
                events,
                running: Mutex::new(None),
            },
            rx,
        )
    }

    async fn stop(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        running.stopped.store(true, Ordering::SeqCst);

        if running.child.try_wait()?.is_some() {
            return Ok(());
        }

        match running.child.kill().await {
            Ok(()) => {
                let _ = running.child.wait().await?;
            }
            Err(e) => {
                // Exited between `try_wait` and `kill`: `try_wait` reaps it.
                if running.child.try_wait()?.is_none() {
                    *self.running.lock().await = Some(running);
                    return Err(Error::Io(e));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimePort for RealtimeBridge {
    async fn connect(&self, cursor: &InboxCursor) -> Result<()> {
        self.stop().await?;

        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&self.cfg.args)
            .env(ENV_SEQ_ID, cursor.seq_id.to_string())
            .env(ENV_SNAPSHOT_AT_MS, cursor.snapshot_at_ms.to_string())
            .env(ENV_SESSION_FILE, &self.cfg.session_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::External(format!(
                "failed to start realtime bridge '{}': {e}",
                self.cfg.program.display()
            ))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("bridge stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();
        info!(
            "Realtime bridge started (seq_id {}, snapshot_at_ms {})",
            cursor.seq_id, cursor.snapshot_at_ms
        );

        let stopped = Arc::new(AtomicBool::new(false));
        *self.running.lock().await = Some(Running {
            child,
            stopped: stopped.clone(),
        });

        // Drain stderr so a chatty bridge never blocks on a full pipe.
        let tail = Arc::new(Mutex::new(StderrTail::default()));
        let stderr_task = stderr.map(|stderr| {
            let tail = tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    debug!("bridge: {line}");
                    tail.lock().await.push_line(line);
                }
            })
        });

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = parse_bridge_line(&line) else {
                            continue;
                        };
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Realtime bridge stdout read failed: {e}");
                        break;
                    }
                }
            }

            if let Some(task) = stderr_task {
                let _ = task.await;
            }
            // A deliberate disconnect is not reported as a closed feed.
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            let tail = tail.lock().await.snapshot();
            if !tail.is_empty() {
                let _ = events
                    .send(TransportEvent::Error(format!("realtime bridge exited: {tail}")))
                    .await;
            }
            let _ = events.send(TransportEvent::Close).await;
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop().await
    }
}

/// Parse one stdout line of the bridge. Malformed or unknown lines are logged and dropped.
pub fn parse_bridge_line(line: &str) -> Option<TransportEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("Dropping malformed bridge line: {e}");
            return None;
        }
    };
    let data = v.get("data").cloned().unwrap_or(Value::Null);

    match v.get("event").and_then(|e| e.as_str()) {
        Some("message") => match InboundMessage::from_realtime(&data) {
            Ok(m) => Some(TransportEvent::Message(Box::new(m))),
            Err(e) => {
                warn!("Dropping invalid realtime message: {e}");
                None
            }
        },
        Some("receive") => Some(TransportEvent::Receive {
            topic: data.get("topic").cloned().unwrap_or(Value::Null),
            payload: data.get("payload").cloned().unwrap_or(Value::Null),
        }),
        Some("direct") => Some(TransportEvent::Direct(data)),
        Some("error") => {
            let msg = match &data {
                Value::String(s) => s.clone(),
                other => other
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| other.to_string()),
            };
            Some(TransportEvent::Error(msg))
        }
        Some("close") => Some(TransportEvent::Close),
        other => {
            warn!("Dropping bridge line with unknown event {other:?}");
            None
        }
    }
}

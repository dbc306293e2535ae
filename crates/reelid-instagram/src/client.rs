use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use reelid_core::{
    domain::{Friendship, InboxCursor, Inviter, PendingThread, ThreadId, UserId},
    errors::Error,
    ports::{AccountPort, DirectPort},
    Result,
};

use crate::state::{ClientState, DeviceIdentity};

/// Client for the mobile app's private REST API.
///
/// Only the handful of endpoints the bot needs are implemented. Auth state lives in a
/// serializable [`ClientState`] so it can be persisted and restored between runs.
pub struct InstagramClient {
    http: reqwest::Client,
    base_url: String,
    state: Mutex<ClientState>,
    request_end: broadcast::Sender<()>,
    context_seq: AtomicU64,
}

impl InstagramClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::External(format!("instagram http client: {e}")))?;
        let (request_end, _) = broadcast::channel(64);

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            state: Mutex::new(ClientState::default()),
            request_end,
            context_seq: AtomicU64::new(0),
        })
    }

    pub fn state_snapshot(&self) -> ClientState {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn headers(&self) -> HeaderMap {
        let st = self.state();
        let mut h = HeaderMap::new();
        let mut put = |k: &'static str, v: &str| {
            if let Ok(v) = HeaderValue::from_str(v) {
                h.insert(k, v);
            }
        };

        put("user-agent", &st.user_agent());
        put("x-ig-app-id", &st.constants.app_id);
        put("x-bloks-version-id", &st.constants.bloks_version_id);
        put("x-ig-device-id", &st.device.uuid);
        put("x-ig-android-id", &st.device.device_id);
        put("x-ig-app-locale", "en_US");
        put("x-ig-connection-type", "WIFI");
        if let Some(auth) = &st.authorization {
            put("authorization", auth);
        }
        if let Some(mid) = &st.mid {
            put("x-mid", mid);
        }
        if let Some(user) = st.user_id {
            put("ig-u-ds-user-id", &user.to_string());
        }
        h
    }

    fn absorb_headers(&self, headers: &HeaderMap) {
        let get = |k: &str| {
            headers
                .get(k)
                .and_then(|v| v.to_str().ok())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        let mut st = self.state();
        if let Some(auth) = get("ig-set-authorization") {
            st.authorization = Some(auth);
        }
        if let Some(mid) = get("ig-set-x-mid") {
            st.mid = Some(mid);
        }
        if let Some(id) = get("ig-set-ig-u-ds-user-id").and_then(|s| s.parse::<i64>().ok()) {
            st.user_id = Some(UserId(id));
        }
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        form: Option<Vec<(&str, String)>>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut req = self.http.request(method, &url).headers(self.headers());
        if let Some(form) = &form {
            req = req.form(form);
        }

        let sent = req.send().await;
        let resp = match sent {
            Ok(r) => r,
            Err(e) => {
                let _ = self.request_end.send(());
                return Err(Error::External(format!("instagram request error: {e}")));
            }
        };

        self.absorb_headers(resp.headers());
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        // Subscribers persist the state, so notify only after the new headers were absorbed.
        let _ = self.request_end.send(());

        debug!("{endpoint} -> {status}");
        let v: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

        if !status.is_success() || v.get("status").and_then(|s| s.as_str()) == Some("fail") {
            let message = v
                .get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| body.chars().take(200).collect());
            if status == reqwest::StatusCode::UNAUTHORIZED
                || message.contains("login_required")
                || message.contains("challenge_required")
                || message.contains("two_factor_required")
            {
                return Err(Error::Auth(format!("{endpoint}: {status} {message}")));
            }
            return Err(Error::External(format!("{endpoint}: {status} {message}")));
        }

        Ok(v)
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        form: Option<Vec<(&str, String)>>,
    ) -> Result<T> {
        let v = self.request(method, endpoint, form).await?;
        serde_json::from_value(v)
            .map_err(|e| Error::External(format!("{endpoint}: unexpected response: {e}")))
    }

    fn signed_body(payload: &Value) -> String {
        format!("SIGNATURE.{payload}")
    }

    fn client_context(&self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let seq = self.context_seq.fetch_add(1, Ordering::SeqCst) % 1000;
        format!("{}", now * 1000 + seq)
    }
}

fn jazoest(phone_id: &str) -> String {
    let sum: u32 = phone_id.bytes().map(u32::from).sum();
    format!("2{sum}")
}

#[async_trait]
impl AccountPort for InstagramClient {
    fn generate_device(&self, seed: &str) {
        self.state().device = DeviceIdentity::from_seed(seed);
    }

    /// Best-effort: a failing warm-up request should not block the login itself.
    async fn pre_login_flow(&self) -> Result<()> {
        let uuid = self.state().device.uuid.clone();
        let payload = json!({ "id": uuid, "server_config_retrieval": "1" });
        if let Err(e) = self
            .request(
                Method::POST,
                "launcher/sync/",
                Some(vec![("signed_body", Self::signed_body(&payload))]),
            )
            .await
        {
            warn!("Pre-login sync failed: {e}");
        }
        Ok(())
    }

    async fn login(&self, username: &str, password: &str) -> Result<UserId> {
        let device = self.state().device.clone();
        let payload = json!({
            "username": username,
            "enc_password": format!("#PWD_INSTAGRAM:0:{}:{}", Utc::now().timestamp(), password),
            "guid": device.uuid,
            "phone_id": device.phone_id,
            "device_id": device.device_id,
            "adid": device.adid,
            "google_tokens": "[]",
            "login_attempt_count": "0",
            "jazoest": jazoest(&device.phone_id),
        });

        #[derive(Deserialize)]
        struct LoggedInUser {
            #[serde(deserialize_with = "de_user_id")]
            pk: UserId,
        }
        #[derive(Deserialize)]
        struct LoginResponse {
            logged_in_user: LoggedInUser,
        }

        let resp: LoginResponse = self
            .request_as(
                Method::POST,
                "accounts/login/",
                Some(vec![("signed_body", Self::signed_body(&payload))]),
            )
            .await?;

        let user_id = resp.logged_in_user.pk;
        self.state().user_id = Some(user_id);
        Ok(user_id)
    }

    async fn serialize_state(&self) -> Result<Value> {
        Ok(serde_json::to_value(&*self.state())?)
    }

    async fn deserialize_state(&self, state: Value) -> Result<()> {
        let restored: ClientState = serde_json::from_value(state)?;
        *self.state() = restored;
        Ok(())
    }

    fn subscribe_request_end(&self) -> broadcast::Receiver<()> {
        self.request_end.subscribe()
    }
}

#[async_trait]
impl DirectPort for InstagramClient {
    async fn broadcast_text(&self, user: UserId, text: &str) -> Result<()> {
        let uuid = self.state().device.uuid.clone();
        let context = self.client_context();
        self.request(
            Method::POST,
            "direct_v2/threads/broadcast/text/",
            Some(vec![
                ("action", "send_item".to_string()),
                ("recipient_users", format!("[[{}]]", user.0)),
                ("client_context", context.clone()),
                ("mutation_token", context),
                ("_uuid", uuid),
                ("text", text.to_string()),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn friendship(&self, user: UserId) -> Result<Friendship> {
        self.request_as(Method::GET, &format!("friendships/show/{}/", user.0), None)
            .await
    }

    async fn pending_threads(&self) -> Result<Vec<PendingThread>> {
        let resp: PendingInboxResponse = self
            .request_as(Method::GET, "direct_v2/pending_inbox/", None)
            .await?;
        Ok(resp.into_pending())
    }

    async fn approve_thread(&self, thread: &ThreadId) -> Result<()> {
        let uuid = self.state().device.uuid.clone();
        self.request(
            Method::POST,
            &format!("direct_v2/threads/{}/approve/", thread.0),
            Some(vec![("_uuid", uuid), ("filter", "DEFAULT".to_string())]),
        )
        .await?;
        Ok(())
    }

    async fn inbox_cursor(&self) -> Result<InboxCursor> {
        #[derive(Deserialize)]
        struct InboxResponse {
            #[serde(default)]
            seq_id: i64,
            #[serde(default)]
            snapshot_at_ms: i64,
        }

        let resp: InboxResponse = self
            .request_as(
                Method::GET,
                "direct_v2/inbox/?visual_message_return_type=unseen&persistentBadging=true&limit=20",
                None,
            )
            .await?;
        Ok(InboxCursor {
            seq_id: resp.seq_id,
            snapshot_at_ms: resp.snapshot_at_ms,
        })
    }
}

#[derive(Deserialize)]
struct PendingInboxResponse {
    #[serde(default)]
    inbox: PendingInbox,
}

#[derive(Default, Deserialize)]
struct PendingInbox {
    #[serde(default)]
    threads: Vec<PendingThreadWire>,
}

#[derive(Deserialize)]
struct PendingThreadWire {
    thread_id: String,
    #[serde(default)]
    inviter: Option<InviterWire>,
}

#[derive(Deserialize)]
struct InviterWire {
    #[serde(deserialize_with = "de_user_id")]
    pk: UserId,
}

impl PendingInboxResponse {
    /// Threads without an inviter cannot be answered; they are skipped.
    fn into_pending(self) -> Vec<PendingThread> {
        self.inbox
            .threads
            .into_iter()
            .filter_map(|t| {
                let inviter = t.inviter?;
                Some(PendingThread {
                    thread_id: ThreadId(t.thread_id),
                    inviter: Inviter { pk: inviter.pk },
                })
            })
            .collect()
    }
}

/// User ids show up as numbers or as strings depending on the endpoint.
fn de_user_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<UserId, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(UserId(n)),
        Raw::Str(s) => s
            .trim()
            .parse()
            .map(UserId)
            .map_err(serde::de::Error::custom),
    }
}

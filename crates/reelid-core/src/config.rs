use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_MAX_TOKENS: u32 = 400;
pub const DEFAULT_IG_API_BASE_URL: &str = "https://i.instagram.com/api/v1/";

/// Upper bound for every `*_MINUTES` setting (one year).
pub const MAX_MINUTES: u64 = 366 * 24 * 60;

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Account
    pub ig_username: String,
    pub ig_password: String,
    pub ig_api_base_url: String,

    // Inference
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_max_tokens: u32,

    // Rate limiting / notices
    pub request_delay: Duration,
    pub notify_limit: bool,
    pub limit_retry_info: u32,
    pub notify_no_media: bool,
    pub notify_prediction_failure: bool,

    // Timers
    pub reconnect_interval: Duration,
    pub reconnect_pause: Duration,
    pub pending_interval: Duration,

    // Realtime bridge
    pub realtime_bridge_cmd: PathBuf,
    pub realtime_bridge_args: Vec<String>,

    // Files
    pub session_file: PathBuf,
    pub debug: bool,
    pub debug_dump_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Config {
    /// Load `.env` (existing variables win) and read the configuration.
    ///
    /// Fails when the account credentials are missing.
    pub fn load() -> Result<Self> {
        load_env_file(Path::new(".env"))?;
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_of = |k: &str| get(k).and_then(non_empty);
        let bool_of = |k: &str| str_of(k).map(|s| parse_bool(&s));
        let u64_of = |k: &str| str_of(k).and_then(|s| s.trim().parse::<u64>().ok());
        let minutes_of = |k: &str, default: u64| -> Result<Duration> {
            let minutes = u64_of(k).unwrap_or(default).max(1);
            if minutes > MAX_MINUTES {
                return Err(Error::Config(format!(
                    "{k} must be at most {MAX_MINUTES} minutes, got {minutes}"
                )));
            }
            Ok(Duration::from_secs(minutes * 60))
        };

        let (Some(ig_username), Some(ig_password)) = (str_of("IG_USERNAME"), str_of("IG_PASSWORD"))
        else {
            return Err(Error::Config(
                "Environment variables IG_USERNAME and IG_PASSWORD must be set".to_string(),
            ));
        };

        let request_delay = minutes_of("REQUEST_DELAY_MINUTES", 5)?;
        let reconnect_interval = minutes_of("REALTIME_RECONNECT_MINUTES", 180)?;
        let pending_interval = minutes_of("PENDING_CHECK_MINUTES", 10)?;

        Ok(Self {
            ig_username,
            ig_password,
            ig_api_base_url: str_of("IG_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_IG_API_BASE_URL.to_string()),

            openai_api_key: str_of("OPENAI_API_KEY"),
            openai_base_url: str_of("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_model: str_of("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openai_max_tokens: u64_of("OPENAI_MAX_TOKENS")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(DEFAULT_OPENAI_MAX_TOKENS),

            request_delay,
            notify_limit: bool_of("NOTIFY_LIMIT").unwrap_or(true),
            limit_retry_info: u64_of("LIMIT_RETRY_INFO")
                .map(|v| v.min(u32::MAX as u64) as u32)
                .unwrap_or(3),
            notify_no_media: bool_of("NOTIFY_NO_MEDIA").unwrap_or(true),
            notify_prediction_failure: bool_of("NOTIFY_PREDICTION_FAILURE").unwrap_or(true),

            reconnect_interval,
            reconnect_pause: Duration::from_secs(5),
            pending_interval,

            realtime_bridge_cmd: PathBuf::from(
                str_of("REALTIME_BRIDGE_CMD")
                    .unwrap_or_else(|| "instagram-realtime-bridge".to_string()),
            ),
            realtime_bridge_args: parse_csv(str_of("REALTIME_BRIDGE_ARGS")),

            session_file: PathBuf::from(
                str_of("SESSION_FILE").unwrap_or_else(|| "session/account_session.json".to_string()),
            ),
            // Any non-empty value turns raw dumps on.
            debug: str_of("DEBUG").is_some(),
            debug_dump_dir: PathBuf::from(
                str_of("DEBUG_DUMP_DIR").unwrap_or_else(|| "messages_example".to_string()),
            ),
            log_file: PathBuf::from(str_of("LOG_FILE").unwrap_or_else(|| "app.log".to_string())),
        })
    }
}

/// A missing file is fine; one that exists but does not parse is a config error.
fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::Config(format!(
            "invalid env file {}: {e}",
            path.display()
        ))),
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

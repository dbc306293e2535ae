//! OpenAI adapter (vision classification).
//!
//! Uses the `chat/completions` endpoint with an inline base64 image to name the movie or series a
//! frame comes from.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use tracing::{debug, error};

use reelid_core::{
    config::{Config, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MAX_TOKENS, DEFAULT_OPENAI_MODEL},
    errors::Error,
    ports::Classifier,
    Result,
};

mod prompts;

pub use prompts::{SYSTEM_PROMPT, USER_PROMPT};

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            max_tokens: DEFAULT_OPENAI_MAX_TOKENS,
        }
    }
}

impl From<&Config> for OpenAiConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            api_key: cfg.openai_api_key.clone(),
            base_url: cfg.openai_base_url.clone(),
            model: cfg.openai_model.clone(),
            max_tokens: cfg.openai_max_tokens,
        }
    }
}

/// Media fetched for classification.
#[derive(Clone, Debug)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl DownloadedImage {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    cfg: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    /// No request timeout is set: a slow download or completion only holds up its own message.
    pub fn new(cfg: OpenAiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::External(format!("openai http client: {e}")))?;
        Ok(Self { cfg, http })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.cfg
    }

    pub async fn download_image(&self, url: &str) -> Result<DownloadedImage> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::External(format!("media download error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "media download failed: {}",
                resp.status()
            )));
        }

        let header_mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or("").trim().to_lowercase());

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::External(format!("media read error: {e}")))?
            .to_vec();
        if bytes.is_empty() {
            return Err(Error::External("media download returned no data".to_string()));
        }

        let mime = image_mime(header_mime.as_deref(), &bytes);
        Ok(DownloadedImage { bytes, mime })
    }

    /// Send a system prompt plus a user turn with text and one image; return the first choice.
    pub async fn complete_with_image(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image_url: &str,
    ) -> Result<String> {
        let api_key = self
            .cfg
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

        let body = json!({
            "model": self.cfg.model,
            "max_tokens": self.cfg.max_tokens,
            "messages": [
                { "role": "system", "content": system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_prompt },
                        { "type": "image_url", "image_url": { "url": image_url } }
                    ]
                }
            ]
        });

        let url = format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::External(format!("openai request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "openai completion failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("openai json error: {e}")))?;

        let text = v
            .pointer("/choices/0/message/content")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();

        if text.trim().is_empty() {
            return Err(Error::External(
                "openai completion returned no content".to_string(),
            ));
        }

        Ok(text)
    }
}

/// Classification client: download, inline as a data URI, ask the vision model.
#[derive(Clone, Debug)]
pub struct OpenAiClassifier {
    client: OpenAiClient,
}

impl OpenAiClassifier {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    async fn try_classify(&self, url: &str) -> Result<String> {
        let image = self.client.download_image(url).await?;
        debug!(
            "Downloaded {} bytes of {} for classification",
            image.bytes.len(),
            image.mime
        );
        self.client
            .complete_with_image(SYSTEM_PROMPT, USER_PROMPT, &image.to_data_uri())
            .await
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, url: &str) -> Option<String> {
        match self.try_classify(url).await {
            Ok(text) => Some(text),
            Err(e) => {
                error!("Error classifying image: {e}");
                None
            }
        }
    }
}

/// Prefer an `image/*` content type from the server, then magic bytes, then JPEG.
fn image_mime(header: Option<&str>, bytes: &[u8]) -> String {
    if let Some(h) = header {
        if h.starts_with("image/") {
            return h.to_string();
        }
    }
    sniff_image_mime(bytes).unwrap_or("image/jpeg").to_string()
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

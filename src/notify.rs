#![forbid(unsafe_code)]

//! Telegram Bot API sink. Uploads each artifact as a document with a caption.

use crate::config::Settings;
use anyhow::{Context, Result, anyhow, bail};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Largest file the public Bot API accepts through `sendDocument`.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_CAPTION_CHARS: usize = 1024;
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Outcome of one best-effort delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(String),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send(&self, file: &Path, caption: &str) -> Result<()>;
}

/// Caption layout: file name, title, then the watch URL, one per line.
pub fn build_caption(file: &Path, title: &str, url: &str) -> String {
    let name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let caption = format!("{name}\n{title}\n{url}");
    if caption.chars().count() <= MAX_CAPTION_CHARS {
        caption
    } else {
        caption.chars().take(MAX_CAPTION_CHARS).collect()
    }
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(
        api_url: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.telegram_api_url.clone(),
            settings.bot_token.clone(),
            settings.chat_id.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendDocument", self.api_url, self.bot_token)
    }
}

impl Notifier for TelegramNotifier {
    async fn send(&self, file: &Path, caption: &str) -> Result<()> {
        let size = tokio::fs::metadata(file)
            .await
            .with_context(|| format!("inspecting {}", file.display()))?
            .len();
        if size > MAX_UPLOAD_BYTES {
            bail!(
                "{} is {size} bytes, above the {MAX_UPLOAD_BYTES} byte upload limit",
                file.display()
            );
        }

        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let mime = mime_guess::from_path(file).first_or_octet_stream();
        let document = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.as_ref())
            .context("building document part")?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("document", document);

        // The request URL embeds the bot token, so it is stripped from errors.
        let response = self
            .client
            .post(self.endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(|err| anyhow!("sendDocument request failed: {}", err.without_url()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| anyhow!("reading sendDocument response: {}", err.without_url()))?;

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Ok(ApiResponse {
                description: Some(description),
                ..
            }) => bail!("Telegram rejected upload (status {status}): {description}"),
            _ => bail!("Telegram rejected upload (status {status})"),
        }
    }
}

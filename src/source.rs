#![forbid(unsafe_code)]

//! Video source adapter backed by the `yt-dlp` executable.
//!
//! Two calls are needed by the watcher: a flat listing of the newest channel
//! entry, and a single-format download of one video. Each call stages the
//! configured cookie jar into its own temporary file.

use crate::config::Settings;
use crate::cookies::stage_cookies;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Newest entry of the watched channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl VideoRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        let url = watch_url(&id);
        Self {
            id,
            title: title.into(),
            url,
        }
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendition {
    VideoOnly,
    AudioOnly,
}

impl Rendition {
    pub fn label(self) -> &'static str {
        match self {
            Rendition::VideoOnly => "video",
            Rendition::AudioOnly => "audio",
        }
    }
}

/// A rendition written to the download directory during one poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub path: PathBuf,
    pub rendition: Rendition,
    pub video_id: String,
}

/// Result of a single-format download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub title: String,
}

#[allow(async_fn_in_trait)]
pub trait VideoSource {
    /// Returns the most recent entry of the channel without fetching media.
    async fn latest(&self) -> Result<Option<VideoRecord>>;

    /// Downloads the stream selected by `format` into `output_dir`.
    async fn download(&self, video_url: &str, format: &str, output_dir: &Path)
    -> Result<Download>;
}

pub struct YtDlpSource {
    program: PathBuf,
    channel_url: String,
    cookie: Option<String>,
}

impl YtDlpSource {
    pub fn new(program: impl Into<PathBuf>, channel_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            channel_url: channel_url.into(),
            cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.ytdlp_path, settings.channel_url.clone())
            .with_cookie(settings.cookie.clone())
    }

    async fn run(&self, mut command: Command, label: &str) -> Result<Vec<u8>> {
        let output = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("running {} for {label}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{label} failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(output.stdout)
    }
}

impl VideoSource for YtDlpSource {
    async fn latest(&self) -> Result<Option<VideoRecord>> {
        let cookies = stage_cookies(self.cookie.as_deref())?;

        let mut command = Command::new(&self.program);
        command
            .arg("--flat-playlist")
            .arg("--dump-single-json")
            .arg("--playlist-items")
            .arg("1")
            .arg("--no-warnings")
            .arg("--cookies")
            .arg(cookies.path())
            .arg(&self.channel_url);

        let stdout = self.run(command, "channel listing").await?;
        parse_latest(&stdout)
    }

    async fn download(
        &self,
        video_url: &str,
        format: &str,
        output_dir: &Path,
    ) -> Result<Download> {
        let cookies = stage_cookies(self.cookie.as_deref())?;
        let template = output_dir.join(format!("%(title)s.f{format}.%(ext)s"));

        let mut command = Command::new(&self.program);
        command
            .arg("--format")
            .arg(format)
            .arg("--output")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-simulate")
            .arg("--dump-single-json")
            .arg("--cookies")
            .arg(cookies.path())
            .arg(video_url);

        let stdout = self
            .run(command, &format!("download of format {format}"))
            .await?;
        parse_download(&stdout)
    }
}

/// Runs `<program> --version` so a missing yt-dlp fails at startup instead
/// of on every poll.
pub async fn ensure_program_available(program: &Path) -> Result<()> {
    let status = Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!("{} is not installed or not in PATH: {}", program.display(), err),
    }
}

/// Subset of a flat `--dump-single-json` playlist payload.
#[derive(Deserialize)]
struct PlaylistInfo {
    #[serde(default)]
    entries: Vec<Option<PlaylistEntry>>,
}

#[derive(Deserialize)]
struct PlaylistEntry {
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Subset of the info JSON yt-dlp prints after a download.
#[derive(Deserialize)]
struct DownloadInfo {
    title: Option<String>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
    #[serde(rename = "_filename")]
    internal_filename: Option<String>,
    filename: Option<String>,
}

#[derive(Deserialize)]
struct RequestedDownload {
    filepath: Option<String>,
    #[serde(rename = "_filename")]
    internal_filename: Option<String>,
}

fn parse_latest(raw: &[u8]) -> Result<Option<VideoRecord>> {
    let info: PlaylistInfo =
        serde_json::from_slice(raw).context("deserializing channel listing")?;
    // Only the newest entry is considered; older uploads are never backfilled.
    let Some(Some(entry)) = info.entries.into_iter().next() else {
        return Ok(None);
    };
    let Some(id) = entry.id.filter(|id| !id.trim().is_empty()) else {
        return Ok(None);
    };
    Ok(Some(VideoRecord::new(
        id.trim(),
        entry.title.unwrap_or_default(),
    )))
}

fn parse_download(raw: &[u8]) -> Result<Download> {
    let info: DownloadInfo =
        serde_json::from_slice(raw).context("deserializing download info")?;

    let path = info
        .requested_downloads
        .iter()
        .find_map(|download| {
            download
                .filepath
                .clone()
                .or_else(|| download.internal_filename.clone())
        })
        .or(info.internal_filename)
        .or(info.filename)
        .filter(|path| !path.trim().is_empty());

    let Some(path) = path else {
        bail!("download info did not report an output file");
    };

    Ok(Download {
        path: PathBuf::from(path),
        title: info
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| "No Title".to_string()),
    })
}

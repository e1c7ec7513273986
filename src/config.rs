#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
pub const DEFAULT_SENT_LOG_FILE: &str = "sent_log.json";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RUN_WINDOW_MINUTES: u64 = 120;
/// 480p mp4, video only.
pub const DEFAULT_VIDEO_FORMAT: &str = "135";
/// m4a, audio only.
pub const DEFAULT_AUDIO_FORMAT: &str = "140";
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// When a processed video is written to the sent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Commit once both downloads succeeded and both deliveries were
    /// attempted, whatever their outcome.
    #[default]
    AfterAttempt,
    /// Commit only when both deliveries were accepted by the chat endpoint.
    AfterDelivery,
}

impl CommitPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "after-attempt" | "attempt" => Some(Self::AfterAttempt),
            "after-delivery" | "delivery" => Some(Self::AfterDelivery),
            _ => None,
        }
    }
}

/// Everything the watcher needs, resolved once at startup.
#[derive(Clone)]
pub struct Settings {
    pub bot_token: String,
    pub chat_id: String,
    pub channel_url: String,
    /// Raw cookie jar text. Checked lazily when cookies are staged.
    pub cookie: Option<String>,
    pub download_dir: PathBuf,
    pub sent_log_path: PathBuf,
    pub poll_interval: Duration,
    pub run_window: Duration,
    pub video_format: String,
    pub audio_format: String,
    pub ytdlp_path: PathBuf,
    pub telegram_api_url: String,
    pub commit_policy: CommitPolicy,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("channel_url", &self.channel_url)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("download_dir", &self.download_dir)
            .field("sent_log_path", &self.sent_log_path)
            .field("poll_interval", &self.poll_interval)
            .field("run_window", &self.run_window)
            .field("video_format", &self.video_format)
            .field("audio_format", &self.audio_format)
            .field("ytdlp_path", &self.ytdlp_path)
            .field("telegram_api_url", &self.telegram_api_url)
            .field("commit_policy", &self.commit_policy)
            .finish()
    }
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(DEFAULT_ENV_PATH))
}

pub fn load_settings_from(env_path: &Path) -> Result<Settings> {
    let file_vars = read_env_file(env_path)?;
    build_settings(&file_vars, env_var_string)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let required = |key: &str| {
        lookup_value(key, file_vars, &env_lookup).ok_or_else(|| anyhow!("{key} not set"))
    };
    let optional = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let bot_token = required("BOT_TOKEN")?;
    let chat_id = required("CHAT_ID")?;
    let channel_url = required("ARTIST_CHANNEL_URL")?;

    let cookie = optional("COOKIE");

    let poll_interval_secs = optional("POLL_INTERVAL_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    let run_window_minutes = optional("RUN_WINDOW_MINUTES")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RUN_WINDOW_MINUTES);
    let commit_policy = optional("COMMIT_POLICY")
        .and_then(|value| CommitPolicy::parse(&value))
        .unwrap_or_default();

    Ok(Settings {
        bot_token,
        chat_id,
        channel_url,
        cookie,
        download_dir: PathBuf::from(
            optional("DOWNLOAD_DIR").unwrap_or_else(|| DEFAULT_DOWNLOAD_DIR.to_string()),
        ),
        sent_log_path: PathBuf::from(
            optional("SENT_LOG_FILE").unwrap_or_else(|| DEFAULT_SENT_LOG_FILE.to_string()),
        ),
        poll_interval: Duration::from_secs(poll_interval_secs),
        run_window: Duration::from_secs(run_window_minutes.saturating_mul(60)),
        video_format: optional("VIDEO_FORMAT").unwrap_or_else(|| DEFAULT_VIDEO_FORMAT.to_string()),
        audio_format: optional("AUDIO_FORMAT").unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
        ytdlp_path: PathBuf::from(
            optional("YTDLP_PATH").unwrap_or_else(|| DEFAULT_YTDLP_PATH.to_string()),
        ),
        telegram_api_url: optional("TELEGRAM_API_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
        commit_policy,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parses a dotenv-style file. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.replace("\\n", "\n"));
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const REQUIRED: &str =
        "BOT_TOKEN=\"123:abc\"\nCHAT_ID=\"-10042\"\nARTIST_CHANNEL_URL=\"https://music.youtube.com/channel/UC1\"\n";

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> Result<Settings> {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None)
    }

    #[test]
    fn build_settings_applies_defaults() {
        let settings = settings_from(REQUIRED).unwrap();
        assert_eq!(settings.bot_token, "123:abc");
        assert_eq!(settings.chat_id, "-10042");
        assert_eq!(
            settings.channel_url,
            "https://music.youtube.com/channel/UC1"
        );
        assert_eq!(settings.download_dir, PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        assert_eq!(settings.sent_log_path, PathBuf::from(DEFAULT_SENT_LOG_FILE));
        assert_eq!(settings.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.run_window, Duration::from_secs(120 * 60));
        assert_eq!(settings.video_format, "135");
        assert_eq!(settings.audio_format, "140");
        assert_eq!(settings.ytdlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(settings.telegram_api_url, DEFAULT_TELEGRAM_API_URL);
        assert_eq!(settings.commit_policy, CommitPolicy::AfterAttempt);
    }

    #[test]
    fn build_settings_requires_bot_token() {
        let err = settings_from("CHAT_ID=1\nARTIST_CHANNEL_URL=x\n").unwrap_err();
        assert!(err.to_string().contains("BOT_TOKEN not set"));
    }

    #[test]
    fn build_settings_treats_blank_as_missing() {
        let err = settings_from("BOT_TOKEN=\"  \"\nCHAT_ID=1\nARTIST_CHANNEL_URL=x\n").unwrap_err();
        assert!(err.to_string().contains("BOT_TOKEN not set"));
    }

    #[test]
    fn build_settings_prefers_env_over_file() {
        let vars = read_env_file(make_config(REQUIRED).path()).unwrap();
        let settings = build_settings(&vars, |key| {
            if key == "CHAT_ID" {
                Some("@override".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(settings.chat_id, "@override");
        assert_eq!(settings.bot_token, "123:abc");
    }

    #[test]
    fn build_settings_reads_overrides() {
        let settings = settings_from(&format!(
            "{REQUIRED}POLL_INTERVAL_SECS=5\nRUN_WINDOW_MINUTES=3\nDOWNLOAD_DIR=/tmp/dl\nSENT_LOG_FILE=/tmp/sent.json\nVIDEO_FORMAT=136\nAUDIO_FORMAT=251\nTELEGRAM_API_URL=http://localhost:8081/\nCOMMIT_POLICY=after-delivery\n"
        ))
        .unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.run_window, Duration::from_secs(180));
        assert_eq!(settings.download_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(settings.sent_log_path, PathBuf::from("/tmp/sent.json"));
        assert_eq!(settings.video_format, "136");
        assert_eq!(settings.audio_format, "251");
        assert_eq!(settings.telegram_api_url, "http://localhost:8081");
        assert_eq!(settings.commit_policy, CommitPolicy::AfterDelivery);
    }

    #[test]
    fn build_settings_invalid_numbers_default() {
        let settings = settings_from(&format!(
            "{REQUIRED}POLL_INTERVAL_SECS=soon\nRUN_WINDOW_MINUTES=-1\nCOMMIT_POLICY=whenever\n"
        ))
        .unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.run_window, Duration::from_secs(7200));
        assert_eq!(settings.commit_policy, CommitPolicy::AfterAttempt);
    }

    #[test]
    fn build_settings_saturates_huge_run_window() {
        let settings = settings_from(&format!(
            "{REQUIRED}RUN_WINDOW_MINUTES=307445734561825861\n"
        ))
        .unwrap();
        assert_eq!(settings.run_window, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn cookie_from_file_keeps_escaped_newlines() {
        let settings = settings_from(&format!(
            "{REQUIRED}COOKIE=\"# Netscape HTTP Cookie File\\n.youtube.com\\tTRUE\"\n"
        ))
        .unwrap();
        let cookie = settings.cookie.unwrap();
        assert!(cookie.starts_with("# Netscape HTTP Cookie File\n"));
    }

    #[test]
    fn missing_cookie_is_not_fatal_at_load() {
        let settings = settings_from(REQUIRED).unwrap();
        assert!(settings.cookie.is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let settings = settings_from(&format!("{REQUIRED}COOKIE=secret-jar\n")).unwrap();
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("123:abc"));
        assert!(!rendered.contains("secret-jar"));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export BOT_TOKEN="1:token"
            CHAT_ID='-1001'
            DOWNLOAD_DIR =  "/data/downloads"
            POLL_INTERVAL_SECS=30
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("BOT_TOKEN").unwrap(), "1:token");
        assert_eq!(vars.get("CHAT_ID").unwrap(), "-1001");
        assert_eq!(vars.get("DOWNLOAD_DIR").unwrap(), "/data/downloads");
        assert_eq!(vars.get("POLL_INTERVAL_SECS").unwrap(), "30");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_expands_escaped_newlines() {
        let cfg = make_config("COOKIE=\"line1\\nline2\"\nPLAIN=a\\nb\n");
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("COOKIE").unwrap(), "line1\nline2");
        assert_eq!(vars.get("PLAIN").unwrap(), "a\nb");
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}

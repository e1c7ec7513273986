#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Cookie jar materialized on disk for a single yt-dlp invocation. The file
/// is removed when the value is dropped.
#[derive(Debug)]
pub struct StagedCookies {
    file: NamedTempFile,
}

impl StagedCookies {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Writes the raw cookie blob verbatim into a fresh `.txt` temp file.
pub fn stage_cookies(cookie: Option<&str>) -> Result<StagedCookies> {
    let Some(cookie) = cookie else {
        bail!("COOKIE not set");
    };

    let mut file = tempfile::Builder::new()
        .prefix("cookies-")
        .suffix(".txt")
        .tempfile()
        .context("creating cookie file")?;
    file.write_all(cookie.as_bytes())
        .context("writing cookie file")?;
    file.flush().context("flushing cookie file")?;
    Ok(StagedCookies { file })
}

#![forbid(unsafe_code)]

//! Persisted set of video ids that have already been relayed.
//!
//! The whole set is rewritten after every addition. Entries are never removed.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct SentLog {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl SentLog {
    /// Reads the log at `path`. Never fails: a missing file yields an empty
    /// log. An unreadable or malformed one is logged, moved aside to
    /// `<name>.corrupt` so the next write cannot destroy it, and treated as
    /// empty.
    pub fn load(path: &Path) -> Self {
        let ids = match read_ids(path) {
            Ok(ids) => ids,
            Err(err) => {
                let backup = corrupt_path(path);
                match fs::rename(path, &backup) {
                    Ok(()) => warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %format!("{err:#}"),
                        "ignoring unreadable sent log; moved it aside"
                    ),
                    Err(rename_err) => warn!(
                        path = %path.display(),
                        error = %format!("{err:#}"),
                        rename_error = %rename_err,
                        "ignoring unreadable sent log"
                    ),
                }
                BTreeSet::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            ids,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.ids.contains(video_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Adds `video_id` and persists the whole set before returning. When the
    /// write fails the in-memory set is left unchanged, so the id is retried
    /// on the next poll. Returns `false` when the id was already present.
    pub fn commit(&mut self, video_id: &str) -> Result<bool> {
        if self.ids.contains(video_id) {
            return Ok(false);
        }
        let mut next = self.ids.clone();
        next.insert(video_id.to_string());
        write_ids(&self.path, &next)?;
        self.ids = next;
        Ok(true)
    }

    /// Replaces the file on disk with the current set. Called once at startup
    /// so an unwritable location is reported before the first poll.
    pub fn save(&self) -> Result<()> {
        write_ids(&self.path, &self.ids)
    }
}

// The payload goes to a sibling `.tmp` file first and is renamed into place,
// so an interrupted write leaves the previous log intact.
fn write_ids(path: &Path, ids: &BTreeSet<String>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let payload = serde_json::to_vec(ids).context("serializing sent log")?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

fn read_ids(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let ids: Vec<String> =
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(ids.into_iter().collect())
}

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Deletes every entry of `dir` whose file name does not match the file name
/// of one of `keep`. Best effort: failures are skipped silently. Returns how
/// many entries were removed.
pub fn sweep_except(dir: &Path, keep: &[PathBuf]) -> usize {
    let keep_names: HashSet<OsString> = keep
        .iter()
        .filter_map(|path| path.file_name().map(|name| name.to_os_string()))
        .collect();

    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if keep_names.contains(&entry.file_name()) {
            continue;
        }
        let path = entry.path();
        if fs::remove_file(&path).is_ok() {
            debug!(path = %path.display(), "removed stale download");
            removed += 1;
        }
    }
    removed
}

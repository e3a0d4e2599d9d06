//! World directories.
//!
//! A world is a directory directly under the server directory that contains
//! the marker file (`level.dat` by default). Directories without the marker
//! are never reported or treated as worlds.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Whether `dir` is a world directory.
pub fn is_world(dir: &Path, marker: &str) -> bool {
    dir.is_dir() && dir.join(marker).is_file()
}

/// Lists world names under `root`, sorted alphabetically.
pub fn list_worlds(root: &Path, marker: &str) -> Result<Vec<String>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::io(
                format!("Failed to list worlds in {}", root.display()),
                e,
            ));
        }
    };

    let mut worlds: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_world(&entry.path(), marker))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    worlds.sort();
    Ok(worlds)
}

/// Derives a safe world name from an uploaded file name.
///
/// Mirrors the usual secure-filename rules: the extension is dropped,
/// whitespace becomes `_`, anything other than ASCII alphanumerics, `-`, `_`
/// and `.` is removed, and leading dots are stripped.
///
/// # Examples
///
/// ```
/// use server_warden::worlds::world_name_from_filename;
///
/// assert_eq!(world_name_from_filename("My World.zip").as_deref(), Some("My_World"));
/// assert_eq!(world_name_from_filename("../../etc.zip").as_deref(), Some("etc"));
/// assert_eq!(world_name_from_filename("???.zip"), None);
/// ```
pub fn world_name_from_filename(filename: &str) -> Option<String> {
    // Only the final path component counts, whichever separator was used.
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => base,
    };

    let cleaned: String = stem
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim_end_matches('.');

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

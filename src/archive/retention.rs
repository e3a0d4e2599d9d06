//! Listing and pruning of backup archives.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Metadata of one backup archive on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    /// File name, including the `.zip` extension
    pub name: String,
    /// Full path to the archive
    #[serde(skip)]
    pub path: PathBuf,
    /// Size of the archive in bytes
    pub size_bytes: u64,
    /// Creation time (modification time where the filesystem has no birth time)
    pub created_at: DateTime<Utc>,
}

fn is_archive_name(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false)
}

/// Lists the archives in `archive_dir`, newest first.
///
/// Hidden files (including in-progress temporary archives) are ignored. A
/// missing directory yields an empty list.
pub fn list_archives(archive_dir: &Path) -> Result<Vec<BackupInfo>> {
    let read_dir = match fs::read_dir(archive_dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::io(
                format!("Failed to list backups in {}", archive_dir.display()),
                e,
            ));
        }
    };

    let mut archives = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable backup directory entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_archive_name(&name) {
            continue;
        }
        // The entry may be pruned concurrently; treat that as absent.
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let created: SystemTime = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        archives.push(BackupInfo {
            name,
            path: entry.path(),
            size_bytes: metadata.len(),
            created_at: DateTime::<Utc>::from(created),
        });
    }

    archives.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });
    Ok(archives)
}

/// Deletes every archive in `archive_dir` beyond the `keep` newest.
///
/// Deletion is best-effort: a file that cannot be removed is logged and
/// skipped. Returns the names that were removed.
pub fn enforce_retention(archive_dir: &Path, keep: usize) -> Result<Vec<String>> {
    let archives = list_archives(archive_dir)?;
    let mut removed = Vec::new();

    for stale in archives.into_iter().skip(keep) {
        match fs::remove_file(&stale.path) {
            Ok(()) => {
                tracing::info!(backup = %stale.name, "Removed backup beyond retention");
                removed.push(stale.name);
            }
            Err(e) => {
                tracing::warn!(backup = %stale.name, error = %e, "Failed to remove old backup");
            }
        }
    }
    Ok(removed)
}

//! Atomic edits of the server's `key=value` properties file.
//!
//! The file is treated as an ordered list of raw lines. Lookups scan for the
//! first line starting with `key=`; updates replace exactly that line (or
//! append a new one) and leave every other line, comment and blank line
//! byte-for-byte intact.
//!
//! Every mutating write first copies the current file to
//! `<file>.bak-<timestamp>` (keeping only the newest few copies), then writes
//! the new content to a temporary file in the same directory and renames it
//! over the original. Readers therefore see either the old or the new file,
//! never a partial one.

use crate::config::validator::validate_text;
use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;

const BACKUP_MARKER: &str = ".bak-";

/// Handle to one properties file.
///
/// Writers are serialized by an internal lock; readers never take it.
pub struct PropertiesFile {
    path: PathBuf,
    backups_to_keep: usize,
    write_lock: Mutex<()>,
}

impl PropertiesFile {
    /// Creates a handle for `path`, keeping `backups_to_keep` pre-write copies.
    pub fn new(path: impl Into<PathBuf>, backups_to_keep: usize) -> Self {
        Self {
            path: path.into(),
            backups_to_keep,
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole file, or `None` if it does not exist.
    pub fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(
                format!("Failed to read {}", self.path.display()),
                e,
            )),
        }
    }

    /// Returns the value of the first `key=` line.
    ///
    /// A missing file behaves like a file without the key.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .read_raw()?
            .and_then(|content| lookup(&content, key).map(str::to_string)))
    }

    /// Sets `key` to `value` and persists the file atomically.
    pub fn set_and_persist(&self, key: &str, value: &str) -> Result<()> {
        validate_pair(key, value)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.read_raw()?;
        let updated = upsert(current.as_deref().unwrap_or(""), key, value);
        self.persist(current.is_some(), &updated)?;

        tracing::info!(file = %self.path.display(), key = %key, value = %value, "Property updated");
        Ok(())
    }

    /// Replaces the entire file content atomically.
    pub fn replace_raw(&self, content: &str) -> Result<()> {
        validate_text(content)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let exists = self.path.exists();
        self.persist(exists, content)?;

        tracing::info!(file = %self.path.display(), bytes = content.len(), "Properties replaced");
        Ok(())
    }

    fn persist(&self, backup_first: bool, content: &str) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;

        if backup_first {
            self.backup_current()?;
        }

        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::io("Failed to create temporary properties file", e))?;
        temp.write_all(content.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| Error::io("Failed to write temporary properties file", e))?;
        temp.persist(&self.path).map_err(|e| {
            Error::io(format!("Failed to replace {}", self.path.display()), e.error)
        })?;
        Ok(())
    }

    fn backup_current(&self) -> Result<()> {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S-%3f");
        let backup = backup_path(&self.path, &stamp.to_string());
        fs::copy(&self.path, &backup).map_err(|e| {
            Error::io(format!("Failed to back up {}", self.path.display()), e)
        })?;
        tracing::debug!(backup = %backup.display(), "Properties backed up");
        self.prune_backups();
        Ok(())
    }

    /// Lists existing pre-write copies, newest first.
    pub fn backups(&self) -> Vec<PathBuf> {
        let Some(file_name) = self.path.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            return Vec::new();
        };
        let prefix = format!("{}{}", file_name, BACKUP_MARKER);
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut found: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
                .map(|entry| entry.path())
                .collect(),
            Err(_) => Vec::new(),
        };
        // Timestamps sort lexicographically.
        found.sort();
        found.reverse();
        found
    }

    fn prune_backups(&self) {
        for stale in self.backups().into_iter().skip(self.backups_to_keep) {
            if let Err(e) = fs::remove_file(&stale) {
                tracing::warn!(backup = %stale.display(), error = %e, "Failed to prune properties backup");
            }
        }
    }
}

fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(BACKUP_MARKER);
    name.push(stamp);
    path.with_file_name(name)
}

fn validate_pair(key: &str, value: &str) -> Result<()> {
    if key.is_empty() || key.contains(['=', '\n', '\r']) || key.starts_with(['#', '!']) {
        return Err(Error::InvalidInput(format!("Invalid property key '{}'", key)));
    }
    if value.contains(['\n', '\r']) {
        return Err(Error::InvalidInput(
            "Property values must be a single line".to_string(),
        ));
    }
    validate_text(value)
}

/// Finds the value of the first line starting with `key=`.
pub fn lookup<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::trim)
    })
}

/// Returns `content` with the first `key=` line replaced, or a new line
/// appended when the key is absent. All other lines are kept verbatim.
///
/// # Examples
///
/// ```
/// use server_warden::properties::upsert;
///
/// let updated = upsert("level-name=old\n#comment\nmotd=hi\n", "level-name", "new");
/// assert_eq!(updated, "level-name=new\n#comment\nmotd=hi\n");
/// ```
pub fn upsert(content: &str, key: &str, value: &str) -> String {
    let prefix = format!("{}=", key);
    let mut out = String::with_capacity(content.len() + prefix.len() + value.len() + 1);
    let mut replaced = false;

    for line in content.split_inclusive('\n') {
        if !replaced && line.starts_with(&prefix) {
            let ending = if line.ends_with("\r\n") {
                "\r\n"
            } else if line.ends_with('\n') {
                "\n"
            } else {
                ""
            };
            out.push_str(&prefix);
            out.push_str(value);
            out.push_str(ending);
            replaced = true;
        } else {
            out.push_str(line);
        }
    }

    if !replaced {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&prefix);
        out.push_str(value);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_first_match_wins() {
        let content = "motd=hi\nlevel-name= survival \nlevel-name=other\n";
        assert_eq!(lookup(content, "level-name"), Some("survival"));
        assert_eq!(lookup(content, "level"), None);
        assert_eq!(lookup(content, "missing"), None);
    }

    #[test]
    fn test_upsert_appends_missing_key() {
        assert_eq!(upsert("", "level-name", "w"), "level-name=w\n");
        assert_eq!(upsert("motd=hi", "level-name", "w"), "motd=hi\nlevel-name=w\n");
    }

    #[test]
    fn test_upsert_keeps_crlf() {
        assert_eq!(
            upsert("a=1\r\nb=2\r\n", "a", "9"),
            "a=9\r\nb=2\r\n"
        );
    }

    #[test]
    fn test_invalid_pairs() {
        assert!(validate_pair("level-name", "new\nmotd=x").is_err());
        assert!(validate_pair("a=b", "c").is_err());
        assert!(validate_pair("#comment", "c").is_err());
        assert!(validate_pair("motd", "hello world").is_ok());
    }
}

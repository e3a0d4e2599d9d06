//! Safe extraction of untrusted zip archives.
//!
//! Extraction happens in three phases:
//!
//! 1. every entry name is normalized and checked; a single entry escaping the
//!    destination (absolute path, drive prefix, `..` traversal, symlink)
//!    rejects the whole archive before anything touches the disk
//! 2. entries are written into a staging directory created next to the
//!    destination, on the same filesystem
//! 3. the staged tree is promoted with renames: an existing destination is
//!    moved aside first and only removed once the new tree is in place
//!
//! If the staged tree is a single top-level directory, that directory's
//! contents become the destination, so archives with and without a wrapping
//! root folder land identically.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Counts of what an extraction produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Regular files written
    pub files: usize,
    /// Directories created
    pub directories: usize,
    /// Whether a single wrapping directory was stripped
    pub flattened: bool,
}

/// A validated view of an archive's entries.
#[derive(Debug, Clone, Default)]
pub struct ArchiveListing {
    /// Normalized relative paths of regular files
    pub files: Vec<PathBuf>,
    /// Normalized relative paths of directories
    pub directories: Vec<PathBuf>,
    /// The archive comment, if it is valid UTF-8
    pub comment: Option<String>,
}

impl ArchiveListing {
    /// Whether `marker` exists at the root of the payload, either directly or
    /// under a single wrapping directory.
    ///
    /// A marker one level down only counts when every entry shares that top
    /// level directory, since only then is the payload flattened on extraction.
    pub fn contains_marker(&self, marker: &str) -> bool {
        let mut tops = self
            .files
            .iter()
            .chain(self.directories.iter())
            .filter_map(|path| path.components().next());
        let single_root = match tops.next() {
            Some(first) => tops.all(|top| top == first),
            None => false,
        };

        self.files.iter().any(|path| {
            let parts: Vec<_> = path.components().collect();
            match parts.as_slice() {
                [name] => name.as_os_str() == marker,
                [_, name] => single_root && name.as_os_str() == marker,
                _ => false,
            }
        })
    }
}

/// Normalizes an archive entry name into a relative path.
///
/// Backslashes are treated as separators, `.` segments are dropped and `..`
/// segments pop the previous segment. Returns `Ok(None)` for names that
/// normalize to the root itself.
///
/// # Errors
///
/// Returns [`Error::Security`] when the name is absolute, carries a drive
/// prefix, contains a NUL byte or climbs above the root.
///
/// # Examples
///
/// ```
/// use server_warden::archive::normalize_entry_path;
/// use std::path::PathBuf;
///
/// assert_eq!(
///     normalize_entry_path("world/./region/../level.dat").unwrap(),
///     Some(PathBuf::from("world/level.dat"))
/// );
/// assert!(normalize_entry_path("../evil").is_err());
/// assert!(normalize_entry_path("/etc/passwd").is_err());
/// ```
pub fn normalize_entry_path(raw: &str) -> Result<Option<PathBuf>> {
    let unified = raw.replace('\\', "/");
    let reject = |reason: &str| Err(Error::Security(format!("Archive entry '{}' {}", raw, reason)));

    if unified.starts_with('/') {
        return reject("is an absolute path");
    }
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return reject("has a drive prefix");
    }
    if unified.contains('\0') {
        return reject("contains a NUL byte");
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return reject("escapes the extraction root");
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Ok(None);
    }
    let path: PathBuf = parts.iter().collect();
    // Belt and braces against platform-specific component parsing.
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return reject("is not a plain relative path");
    }
    Ok(Some(path))
}

struct PlannedEntry {
    index: usize,
    path: PathBuf,
    is_dir: bool,
    mode: Option<u32>,
}

fn plan_entries<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<PlannedEntry>> {
    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let name = entry.name().to_string();
        let mode = entry.unix_mode();
        if mode.map(|m| m & S_IFMT == S_IFLNK).unwrap_or(false) {
            return Err(Error::Security(format!(
                "Archive entry '{}' is a symbolic link",
                name
            )));
        }
        let Some(path) = normalize_entry_path(&name)? else {
            continue;
        };
        plan.push(PlannedEntry {
            index,
            path,
            is_dir: entry.is_dir(),
            mode,
        });
    }
    Ok(plan)
}

fn open_archive(archive_path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(archive_path).map_err(|e| {
        Error::io(format!("Failed to open archive {}", archive_path.display()), e)
    })?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

/// Validates every entry of an archive without extracting anything.
pub fn inspect(archive_path: &Path) -> Result<ArchiveListing> {
    let mut archive = open_archive(archive_path)?;
    let plan = plan_entries(&mut archive)?;
    let comment = std::str::from_utf8(archive.comment())
        .ok()
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let mut listing = ArchiveListing {
        comment,
        ..ArchiveListing::default()
    };
    for entry in plan {
        if entry.is_dir {
            listing.directories.push(entry.path);
        } else {
            listing.files.push(entry.path);
        }
    }
    Ok(listing)
}

/// Extracts `archive_path` into `dest_dir`, replacing its previous contents.
///
/// # Errors
///
/// * [`Error::Security`] if any entry would land outside `dest_dir`; nothing
///   on disk has been modified in that case
/// * [`Error::InvalidInput`] if the file is not a zip archive
/// * [`Error::Io`] on disk failures; the previous `dest_dir` is restored
pub fn extract_safely(archive_path: &Path, dest_dir: &Path) -> Result<ExtractSummary> {
    let mut archive = open_archive(archive_path)?;
    let plan = plan_entries(&mut archive)?;

    let parent = dest_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| Error::io(format!("Failed to create {}", parent.display()), e))?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)
        .map_err(|e| Error::io("Failed to create staging directory", e))?;

    let mut summary = ExtractSummary::default();
    for planned in &plan {
        let target = staging.path().join(&planned.path);
        if planned.is_dir {
            fs::create_dir_all(&target)
                .map_err(|e| Error::io(format!("Failed to create {}", target.display()), e))?;
            summary.directories += 1;
            continue;
        }

        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;
        }
        let mut entry = archive.by_index(planned.index)?;
        let mut out = File::create(&target)
            .map_err(|e| Error::io(format!("Failed to create {}", target.display()), e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| Error::io(format!("Failed to extract {}", planned.path.display()), e))?;
        apply_mode(&target, planned.mode);
        summary.files += 1;
    }

    let (payload, flattened) = payload_root(staging.path())?;
    summary.flattened = flattened;
    promote(&payload, dest_dir)?;

    tracing::info!(
        archive = %archive_path.display(),
        dest = %dest_dir.display(),
        files = summary.files,
        flattened,
        "Archive extracted"
    );
    Ok(summary)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        let perms = fs::Permissions::from_mode(mode & 0o755 | 0o600);
        if let Err(e) = fs::set_permissions(path, perms) {
            tracing::debug!(path = %path.display(), error = %e, "Could not apply file mode");
        }
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) {}

fn payload_root(staging: &Path) -> Result<(PathBuf, bool)> {
    let mut entries = fs::read_dir(staging)
        .map_err(|e| Error::io("Failed to read staging directory", e))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::io("Failed to read staging directory", e))?;

    if entries.len() == 1 {
        let only = entries.remove(0);
        let is_dir = only
            .file_type()
            .map_err(|e| Error::io("Failed to inspect staged entry", e))?
            .is_dir();
        if is_dir {
            return Ok((only.path(), true));
        }
    }
    Ok((staging.to_path_buf(), false))
}

fn aside_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "target".to_string());
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    dest.with_file_name(format!(".{}.previous-{}", name, stamp))
}

fn promote(payload: &Path, dest: &Path) -> Result<()> {
    let aside = match fs::symlink_metadata(dest) {
        Ok(_) => {
            let aside = aside_path(dest);
            fs::rename(dest, &aside).map_err(|e| {
                Error::io(format!("Failed to move {} aside", dest.display()), e)
            })?;
            Some(aside)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(Error::io(format!("Failed to inspect {}", dest.display()), e));
        }
    };

    if let Err(e) = fs::rename(payload, dest) {
        if let Some(aside) = &aside {
            if let Err(restore) = fs::rename(aside, dest) {
                tracing::error!(
                    dest = %dest.display(),
                    aside = %aside.display(),
                    error = %restore,
                    "Failed to restore previous directory after aborted swap"
                );
            }
        }
        return Err(Error::io(
            format!("Failed to move extracted data into {}", dest.display()),
            e,
        ));
    }

    if let Some(aside) = aside {
        let removed = if aside.is_dir() {
            fs::remove_dir_all(&aside)
        } else {
            fs::remove_file(&aside)
        };
        if let Err(e) = removed {
            tracing::warn!(path = %aside.display(), error = %e, "Failed to remove previous data");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rejects_escapes() {
        for bad in ["../evil", "/etc/passwd", "a/../../b", "C:/Windows", "..\\evil", "\\abs"] {
            let err = normalize_entry_path(bad).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Security, "{}", bad);
        }
    }

    #[test]
    fn test_normalize_accepts_inner_parent() {
        assert_eq!(
            normalize_entry_path("a/b/../c").unwrap(),
            Some(PathBuf::from("a/c"))
        );
        assert_eq!(normalize_entry_path("./").unwrap(), None);
    }

    #[test]
    fn test_marker_detection() {
        let listing = ArchiveListing {
            files: vec![PathBuf::from("myworld/level.dat"), PathBuf::from("myworld/region/r.mca")],
            ..ArchiveListing::default()
        };
        assert!(listing.contains_marker("level.dat"));

        let deep = ArchiveListing {
            files: vec![PathBuf::from("a/b/level.dat")],
            ..ArchiveListing::default()
        };
        assert!(!deep.contains_marker("level.dat"));

        let two_roots = ArchiveListing {
            files: vec![PathBuf::from("a/level.dat")],
            directories: vec![PathBuf::from("b")],
            ..ArchiveListing::default()
        };
        assert!(!two_roots.contains_marker("level.dat"));
    }
}

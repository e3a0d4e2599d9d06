//! Compressed snapshots of a directory tree.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Counts of what went into a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    /// Regular files written
    pub files: usize,
    /// Directory entries written
    pub directories: usize,
    /// Uncompressed payload size
    pub bytes: u64,
}

/// Writes a zip snapshot of `source_dir` to `dest_archive`.
///
/// Entry names are relative to `source_dir` and always use `/` separators.
/// The archive is assembled in a temporary file next to `dest_archive` and
/// renamed into place, so a listing of the destination directory never sees
/// a partial archive. `comment`, when given, is stored as the archive
/// comment.
///
/// Files that disappear while the tree is being walked are skipped; symbolic
/// links are never followed or stored.
///
/// # Errors
///
/// Returns [`Error::Io`] if `source_dir` is not an existing directory or any
/// read/write fails.
pub fn create_snapshot(
    source_dir: &Path,
    dest_archive: &Path,
    comment: Option<&str>,
) -> Result<SnapshotSummary> {
    if !source_dir.is_dir() {
        return Err(Error::io(
            format!("Snapshot source {} is unavailable", source_dir.display()),
            io::Error::new(io::ErrorKind::NotFound, "directory does not exist"),
        ));
    }

    let dest_parent = dest_archive
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dest_parent).map_err(|e| {
        Error::io(
            format!("Failed to create archive directory {}", dest_parent.display()),
            e,
        )
    })?;

    let temp = NamedTempFile::new_in(dest_parent)
        .map_err(|e| Error::io("Failed to create temporary archive", e))?;
    let writer = BufWriter::new(
        temp.as_file()
            .try_clone()
            .map_err(|e| Error::io("Failed to open temporary archive", e))?,
    );

    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let dir_options = SimpleFileOptions::default().unix_permissions(0o755);
    let mut summary = SnapshotSummary::default();

    for entry in WalkDir::new(source_dir).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(&e) => {
                tracing::warn!(error = %e, "Entry vanished during snapshot, skipping");
                continue;
            }
            Err(e) => {
                let context = format!("Failed to walk {}", source_dir.display());
                return Err(match e.into_io_error() {
                    Some(source) => Error::io(context, source),
                    None => Error::io(context, io::Error::other("filesystem loop")),
                });
            }
        };

        let relative = match entry.path().strip_prefix(source_dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let name = entry_name(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            zip.add_directory(format!("{}/", name), dir_options)?;
            summary.directories += 1;
        } else if file_type.is_file() {
            let mut source = match File::open(entry.path()) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(path = %entry.path().display(), "File vanished during snapshot, skipping");
                    continue;
                }
                Err(e) => {
                    return Err(Error::io(
                        format!("Failed to read {}", entry.path().display()),
                        e,
                    ));
                }
            };
            zip.start_file(name, options)?;
            let copied = io::copy(&mut source, &mut zip).map_err(|e| {
                Error::io(format!("Failed to archive {}", entry.path().display()), e)
            })?;
            summary.files += 1;
            summary.bytes += copied;
        } else {
            tracing::debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }

    if let Some(comment) = comment {
        zip.set_comment(comment.to_string());
    }
    let mut writer = zip.finish()?;
    writer
        .flush()
        .map_err(|e| Error::io("Failed to flush archive", e))?;
    drop(writer);
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::io("Failed to sync archive", e))?;

    temp.persist(dest_archive).map_err(|e| {
        Error::io(
            format!("Failed to move archive into {}", dest_archive.display()),
            e.error,
        )
    })?;

    tracing::info!(
        archive = %dest_archive.display(),
        files = summary.files,
        bytes = summary.bytes,
        "Snapshot created"
    );
    Ok(summary)
}

fn is_vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        let rel: std::path::PathBuf = ["region", "r.0.0.mca"].iter().collect();
        assert_eq!(entry_name(&rel), "region/r.0.0.mca");
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_snapshot(
            &dir.path().join("missing"),
            &dir.path().join("out.zip"),
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        assert!(!dir.path().join("out.zip").exists());
    }
}

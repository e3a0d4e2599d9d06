//! Archive engine for Server Warden.
//!
//! This module creates compressed snapshots of directory trees, prunes old
//! snapshots, and extracts untrusted archives with path-traversal protection
//! and an atomic swap into place. All functions are synchronous and perform
//! blocking disk I/O; async callers should run them on a blocking thread.
//!
//! # Components
//!
//! * `snapshot` - directory tree to zip archive
//! * `extract` - validated, staged, atomically promoted extraction
//! * `retention` - listing archives and keeping only the newest K
//!
//! # Examples
//!
//! ```no_run
//! use server_warden::archive::{create_snapshot, enforce_retention, extract_safely};
//! use std::path::Path;
//!
//! let archive = Path::new("/backups/nightly.zip");
//! create_snapshot(Path::new("/minecraft/world"), archive, Some("world=world")).unwrap();
//! enforce_retention(Path::new("/backups"), 10).unwrap();
//! extract_safely(archive, Path::new("/minecraft/world-copy")).unwrap();
//! ```
pub mod extract;
pub mod retention;
pub mod snapshot;

pub use extract::{
    ArchiveListing, ExtractSummary, extract_safely, inspect, normalize_entry_path,
};
pub use retention::{BackupInfo, enforce_retention, list_archives};
pub use snapshot::{SnapshotSummary, create_snapshot};

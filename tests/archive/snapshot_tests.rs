use crate::read_tree;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use server_warden::archive::{create_snapshot, extract_safely, inspect};
use server_warden::error::{ErrorKind, Result};
use std::path::PathBuf;

fn sample_world(temp: &TempDir) -> PathBuf {
    let world = temp.child("world");
    world.create_dir_all().unwrap();
    world.child("level.dat").write_binary(&[0x1f, 0x8b, 0, 1, 2, 3]).unwrap();
    world.child("region").create_dir_all().unwrap();
    world.child("region/r.0.0.mca").write_binary(&vec![7u8; 64 * 1024]).unwrap();
    world.child("region/r.0.1.mca").write_str("").unwrap();
    world.child("data").create_dir_all().unwrap();
    world.child("data/raids.dat").write_str("raids").unwrap();
    world.child("playerdata").create_dir_all().unwrap();
    world.path().to_path_buf()
}

#[test]
fn test_snapshot_round_trip() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let world = sample_world(&temp);
    let archive = temp.path().join("backups/world.zip");

    let summary = create_snapshot(&world, &archive, None)?;
    assert_eq!(summary.files, 4);
    assert_eq!(summary.directories, 3);
    assert!(archive.is_file());

    let restored = temp.path().join("restored");
    let extracted = extract_safely(&archive, &restored)?;
    assert!(!extracted.flattened);
    assert_eq!(read_tree(&world), read_tree(&restored));
    assert!(restored.join("playerdata").is_dir());

    Ok(())
}

#[test]
fn test_entries_are_relative_with_comment() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let world = sample_world(&temp);
    let archive = temp.path().join("world.zip");

    create_snapshot(&world, &archive, Some("world=world"))?;
    let listing = inspect(&archive)?;

    assert_eq!(listing.comment.as_deref(), Some("world=world"));
    assert!(listing.files.contains(&PathBuf::from("level.dat")));
    assert!(listing.files.contains(&PathBuf::from("region/r.0.0.mca")));
    assert!(listing.contains_marker("level.dat"));
    assert!(listing.files.iter().all(|p| p.is_relative()));

    Ok(())
}

#[test]
fn test_missing_source_fails_without_output() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("out.zip");

    let err = create_snapshot(&temp.path().join("nope"), &archive, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!archive.exists());
}

#[cfg(unix)]
#[test]
fn test_symlinks_are_not_archived() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let world = sample_world(&temp);
    std::os::unix::fs::symlink("/etc/passwd", world.join("passwd")).unwrap();
    let archive = temp.path().join("world.zip");

    let summary = create_snapshot(&world, &archive, None)?;
    assert_eq!(summary.files, 4);
    let listing = inspect(&archive)?;
    assert!(!listing.files.contains(&PathBuf::from("passwd")));

    Ok(())
}

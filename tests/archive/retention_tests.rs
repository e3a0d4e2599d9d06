use assert_fs::TempDir;
use assert_fs::prelude::*;
use server_warden::archive::{create_snapshot, enforce_retention, list_archives};
use server_warden::error::Result;
use std::thread::sleep;
use std::time::Duration;

#[test]
fn test_retention_keeps_newest_archives() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let world = temp.child("world");
    world.create_dir_all().unwrap();
    world.child("level.dat").write_str("level").unwrap();
    let backups = temp.path().join("backups");

    for i in 0..12 {
        let archive = backups.join(format!("backup-{:02}.zip", i));
        create_snapshot(world.path(), &archive, None)?;
        enforce_retention(&backups, 10)?;
        sleep(Duration::from_millis(15));
    }

    let names: Vec<String> = list_archives(&backups)?
        .into_iter()
        .map(|info| info.name)
        .collect();
    let expected: Vec<String> = (2..12).rev().map(|i| format!("backup-{:02}.zip", i)).collect();
    assert_eq!(names, expected);

    Ok(())
}

#[test]
fn test_retention_reports_removed_names() -> Result<()> {
    let temp = TempDir::new().unwrap();
    for name in ["a.zip", "b.zip", "c.zip"] {
        temp.child(name).write_str("zip").unwrap();
        sleep(Duration::from_millis(15));
    }

    let removed = enforce_retention(temp.path(), 1)?;

    assert_eq!(removed, vec!["b.zip".to_string(), "a.zip".to_string()]);
    assert!(temp.child("c.zip").path().exists());

    Ok(())
}

#[test]
fn test_listing_ignores_other_files() -> Result<()> {
    let temp = TempDir::new().unwrap();
    temp.child("nightly.zip").write_str("zip").unwrap();
    temp.child("notes.txt").write_str("notes").unwrap();
    temp.child(".tmpXYZ").write_str("partial").unwrap();
    temp.child("folder.zip").create_dir_all().unwrap();

    let listed = list_archives(temp.path())?;

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "nightly.zip");
    assert_eq!(listed[0].size_bytes, 3);

    Ok(())
}

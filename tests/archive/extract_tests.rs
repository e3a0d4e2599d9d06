use crate::{read_tree, write_zip};
use assert_fs::TempDir;
use assert_fs::prelude::*;
use server_warden::archive::{extract_safely, inspect};
use server_warden::error::{ErrorKind, Result};
use std::fs;
use std::path::Path;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn existing_world(temp: &TempDir) -> std::path::PathBuf {
    let dest = temp.child("server/world");
    dest.create_dir_all().unwrap();
    dest.child("level.dat").write_str("original level").unwrap();
    dest.child("region").create_dir_all().unwrap();
    dest.child("region/r.0.0.mca").write_str("original region").unwrap();
    dest.path().to_path_buf()
}

fn hidden_entries(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect()
}

#[test]
fn test_parent_traversal_is_rejected_without_changes() {
    let temp = TempDir::new().unwrap();
    let dest = existing_world(&temp);
    let before = read_tree(&dest);
    let archive = temp.path().join("evil.zip");
    write_zip(
        &archive,
        &[("level.dat", "replaced"), ("../evil", "pwned")],
    );

    let err = extract_safely(&archive, &dest).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(read_tree(&dest), before);
    assert!(!temp.path().join("server/evil").exists());
    assert!(hidden_entries(&temp.path().join("server")).is_empty());
}

#[test]
fn test_absolute_path_is_rejected_without_changes() {
    let temp = TempDir::new().unwrap();
    let dest = existing_world(&temp);
    let before = read_tree(&dest);
    let archive = temp.path().join("evil.zip");
    write_zip(&archive, &[("/etc/passwd", "root::0:0")]);

    let err = extract_safely(&archive, &dest).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(read_tree(&dest), before);
}

#[test]
fn test_backslash_traversal_is_rejected() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("evil.zip");
    write_zip(&archive, &[("world\\..\\..\\evil", "x")]);

    let err = inspect(&archive).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
}

#[test]
fn test_symlink_entry_is_rejected() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("link.zip");
    let mut zip = ZipWriter::new(fs::File::create(&archive).unwrap());
    zip.add_symlink("level.dat", "/etc/passwd", SimpleFileOptions::default())
        .unwrap();
    zip.finish().unwrap();

    let err = extract_safely(&archive, &temp.path().join("world")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert!(!temp.path().join("world").exists());
}

#[test]
fn test_single_root_directory_is_flattened() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("upload.zip");
    write_zip(
        &archive,
        &[
            ("MyWorld/level.dat", "level"),
            ("MyWorld/region/r.0.0.mca", "region"),
        ],
    );
    let dest = temp.path().join("server/MyWorld");

    let summary = extract_safely(&archive, &dest)?;

    assert!(summary.flattened);
    assert_eq!(summary.files, 2);
    assert_eq!(fs::read(dest.join("level.dat")).unwrap(), b"level");
    assert_eq!(fs::read(dest.join("region/r.0.0.mca")).unwrap(), b"region");
    assert!(!dest.join("MyWorld").exists());

    Ok(())
}

#[test]
fn test_unwrapped_payload_is_kept() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("upload.zip");
    write_zip(&archive, &[("level.dat", "level")]);
    let dest = temp.path().join("world");

    let summary = extract_safely(&archive, &dest)?;

    assert!(!summary.flattened);
    assert_eq!(fs::read(dest.join("level.dat")).unwrap(), b"level");

    Ok(())
}

#[test]
fn test_marker_must_be_at_payload_root() -> Result<()> {
    let temp = TempDir::new().unwrap();

    let at_root = temp.path().join("root.zip");
    write_zip(&at_root, &[("level.dat", "level"), ("region/r.0.0.mca", "r")]);
    assert!(inspect(&at_root)?.contains_marker("level.dat"));

    let wrapped = temp.path().join("wrapped.zip");
    write_zip(&wrapped, &[("a/level.dat", "level"), ("a/region/r.0.0.mca", "r")]);
    assert!(inspect(&wrapped)?.contains_marker("level.dat"));

    // Two top level entries are not flattened, so a/level.dat stays nested
    let multi = temp.path().join("multi.zip");
    write_zip(&multi, &[("a/level.dat", "level"), ("b/other.txt", "other")]);
    assert!(!inspect(&multi)?.contains_marker("level.dat"));

    let beside_file = temp.path().join("beside.zip");
    write_zip(&beside_file, &[("a/level.dat", "level"), ("readme.txt", "hi")]);
    assert!(!inspect(&beside_file)?.contains_marker("level.dat"));

    let too_deep = temp.path().join("deep.zip");
    write_zip(&too_deep, &[("a/b/level.dat", "level")]);
    assert!(!inspect(&too_deep)?.contains_marker("level.dat"));

    Ok(())
}

#[test]
fn test_existing_destination_is_replaced() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let dest = existing_world(&temp);
    let archive = temp.path().join("new.zip");
    write_zip(
        &archive,
        &[("level.dat", "new level"), ("data/raids.dat", "raids")],
    );

    extract_safely(&archive, &dest)?;

    assert_eq!(fs::read(dest.join("level.dat")).unwrap(), b"new level");
    assert_eq!(fs::read(dest.join("data/raids.dat")).unwrap(), b"raids");
    assert!(!dest.join("region").exists());
    // Neither the staging area nor the previous copy is left behind
    assert!(hidden_entries(&temp.path().join("server")).is_empty());

    Ok(())
}

#[test]
fn test_not_a_zip_is_invalid_input() {
    let temp = TempDir::new().unwrap();
    let dest = existing_world(&temp);
    let before = read_tree(&dest);
    let archive = temp.child("garbage.zip");
    archive.write_str("this is not an archive").unwrap();

    let err = extract_safely(archive.path(), &dest).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(read_tree(&dest), before);
}

#[test]
fn test_inner_dot_dot_stays_inside() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("odd.zip");
    write_zip(
        &archive,
        &[("region/../level.dat", "level"), ("./data/a.dat", "a")],
    );
    let dest = temp.path().join("world");

    extract_safely(&archive, &dest)?;

    assert_eq!(fs::read(dest.join("level.dat")).unwrap(), b"level");
    assert_eq!(fs::read(dest.join("data/a.dat")).unwrap(), b"a");

    Ok(())
}

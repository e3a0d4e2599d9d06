use assert_fs::TempDir;
use assert_fs::prelude::*;
use server_warden::error::{ErrorKind, Result};
use server_warden::properties::PropertiesFile;
use std::fs;
use std::sync::Arc;
use std::thread;

#[test]
fn test_set_preserves_comments_and_order() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let file = temp.child("server.properties");
    file.write_str("level-name=old\n#comment\nmotd=hi\n").unwrap();
    let properties = PropertiesFile::new(file.path(), 5);

    properties.set_and_persist("level-name", "new")?;

    assert_eq!(
        fs::read_to_string(file.path()).unwrap(),
        "level-name=new\n#comment\nmotd=hi\n"
    );
    assert_eq!(properties.get("level-name")?.as_deref(), Some("new"));
    assert_eq!(properties.get("motd")?.as_deref(), Some("hi"));

    Ok(())
}

#[test]
fn test_backup_taken_before_each_write() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let file = temp.child("server.properties");
    file.write_str("level-name=old\n").unwrap();
    let properties = PropertiesFile::new(file.path(), 5);

    properties.set_and_persist("level-name", "new")?;

    let backups = properties.backups();
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "level-name=old\n");
    assert!(
        backups[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("server.properties.bak-")
    );

    Ok(())
}

#[test]
fn test_backups_are_pruned() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let file = temp.child("server.properties");
    file.write_str("motd=0\n").unwrap();
    let properties = PropertiesFile::new(file.path(), 2);

    for i in 1..=5 {
        properties.set_and_persist("motd", &i.to_string())?;
        thread::sleep(std::time::Duration::from_millis(5));
    }

    let backups = properties.backups();
    assert_eq!(backups.len(), 2);
    // Newest first: the copy taken before the last write holds "motd=4"
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "motd=4\n");
    assert_eq!(fs::read_to_string(&backups[1]).unwrap(), "motd=3\n");

    Ok(())
}

#[test]
fn test_missing_file_is_created() -> Result<()> {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("server.properties");
    let properties = PropertiesFile::new(&path, 5);

    assert_eq!(properties.get("level-name")?, None);
    assert_eq!(properties.read_raw()?, None);

    properties.set_and_persist("level-name", "survival")?;

    assert_eq!(fs::read_to_string(&path).unwrap(), "level-name=survival\n");
    assert!(properties.backups().is_empty());

    Ok(())
}

#[test]
fn test_replace_raw_rejects_binary_content() {
    let temp = TempDir::new().unwrap();
    let file = temp.child("server.properties");
    file.write_str("motd=hi\n").unwrap();
    let properties = PropertiesFile::new(file.path(), 5);

    let err = properties.replace_raw("motd=\u{0}\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = properties.set_and_persist("motd", "a\nop=me").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert_eq!(fs::read_to_string(file.path()).unwrap(), "motd=hi\n");
    assert!(properties.backups().is_empty());
}

#[test]
fn test_readers_never_see_partial_writes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("server.properties");
    let big_a = format!("motd={}\n", "a".repeat(256 * 1024));
    let big_b = format!("motd={}\n", "b".repeat(256 * 1024));
    fs::write(&path, &big_a).unwrap();
    let properties = Arc::new(PropertiesFile::new(&path, 1));

    let writer = {
        let properties = Arc::clone(&properties);
        let (a, b) = (big_a.clone(), big_b.clone());
        thread::spawn(move || {
            for i in 0..20 {
                let content = if i % 2 == 0 { &b } else { &a };
                properties.replace_raw(content).unwrap();
            }
        })
    };

    for _ in 0..200 {
        let seen = properties.read_raw().unwrap().unwrap();
        assert!(seen == big_a || seen == big_b, "observed a partial file");
    }
    writer.join().unwrap();
}

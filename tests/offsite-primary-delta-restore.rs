mod common;

use std::fs;

use common::{build_fixture, offsite_cli};

fn write_config(home: &std::path::Path, cache_dir: &std::path::Path) {
    fs::create_dir_all(home.join(".config")).unwrap();
    fs::write(
        home.join(".config/snapvault.toml"),
        format!("cache_dir = \"{}\"\n", cache_dir.display()),
    )
    .unwrap();
}

fn assembled_dirs(scratch: &std::path::Path, backup_name: &str) -> Vec<std::path::PathBuf> {
    let mut dirs: Vec<_> = fs::read_dir(scratch.join(backup_name))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    dirs.sort();
    dirs
}

#[test]
fn primary_then_delta_are_both_restorable_from_the_scratch_area() {
    let home = tempfile::tempdir().unwrap();
    let cache_dir = home.path().join("cache");
    write_config(home.path(), &cache_dir);

    let src = tempfile::tempdir().unwrap();
    build_fixture(src.path());

    offsite_cli(home.path())
        .arg("offsite")
        .arg("backup")
        .arg("mybackup")
        .arg(src.path())
        .assert()
        .success();

    let scratch = cache_dir.join("scratch");
    let dirs = assembled_dirs(&scratch, "mybackup");
    assert_eq!(dirs.len(), 1, "expected exactly the primary directory");
    // 9 pool files (each fixture file has distinct content, so no dedup
    // collapses any of them) plus index.json and index.json.hash.
    assert_eq!(common::files_in(&dirs[0]).count(), common::FIXTURE_FILE_COUNT + 2);

    offsite_cli(home.path())
        .arg("offsite")
        .arg("commit")
        .arg("mybackup")
        .assert()
        .success();

    fs::write(src.path().join("one/NewFile1"), "New file 1").unwrap();

    offsite_cli(home.path())
        .arg("offsite")
        .arg("backup")
        .arg("mybackup")
        .arg(src.path())
        .assert()
        .success();

    let dirs = assembled_dirs(&scratch, "mybackup");
    assert_eq!(dirs.len(), 2, "expected a primary and a delta directory");
    let delta_dir = dirs.iter().find(|d| d.file_name().unwrap().to_str().unwrap().ends_with(".delta")).unwrap();
    assert_eq!(common::files_in(delta_dir).count(), 3, "one new pool file plus index.json and index.json.hash");

    let restore_target = tempfile::tempdir().unwrap();
    offsite_cli(home.path())
        .arg("offsite")
        .arg("restore")
        .arg("mybackup")
        .arg(&scratch)
        .arg(restore_target.path())
        .assert()
        .success();

    let mapped_root = restore_target.path().join(src.path().strip_prefix("/").unwrap());
    for rel in ["one/A", "one/BC", "two/File1", "two/File2", "one/NewFile1"] {
        let original = fs::read(src.path().join(rel)).unwrap();
        let restored = fs::read(mapped_root.join(rel)).unwrap();
        assert_eq!(original, restored, "mismatch restoring {rel}");
    }
}

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use walkdir::WalkDir;

pub fn mirror_cli() -> Command {
    Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap()
}

/// A CLI invocation whose `HOME` points at a private temp dir, so offsite's
/// per-user config and state directory lookups don't touch the real one.
pub fn offsite_cli(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    cmd.env("HOME", home);
    cmd
}

pub fn files_in(p: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(p)
        .into_iter()
        .map(|e| e.expect("couldn't walk dir"))
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

/// Builds the standard fixture: `one/A`, `one/BC`, `two/File1..2`,
/// `two/Dir1/File3..4`, `two/Dir2/Dir3/File5`, two very-long filenames
/// under `VeryLongPaths/`, and an empty directory `EmptyDirTest/EmptyDir`.
/// Nine content files plus one empty directory.
pub fn build_fixture(root: &Path) {
    fs::create_dir_all(root.join("one")).unwrap();
    fs::write(root.join("one/A"), "one/A").unwrap();
    fs::write(root.join("one/BC"), "one/BC").unwrap();

    fs::create_dir_all(root.join("two/Dir1")).unwrap();
    fs::create_dir_all(root.join("two/Dir2/Dir3")).unwrap();
    fs::write(root.join("two/File1"), "File1").unwrap();
    fs::write(root.join("two/File2"), "File2").unwrap();
    fs::write(root.join("two/Dir1/File3"), "File3").unwrap();
    fs::write(root.join("two/Dir1/File4"), "File4").unwrap();
    fs::write(root.join("two/Dir2/Dir3/File5"), "File5").unwrap();

    let long_dir = root.join("VeryLongPaths");
    fs::create_dir_all(&long_dir).unwrap();
    fs::write(long_dir.join("a".repeat(200)), "long one").unwrap();
    fs::write(long_dir.join("b".repeat(201)), "long two").unwrap();

    fs::create_dir_all(root.join("EmptyDirTest/EmptyDir")).unwrap();
}

pub const FIXTURE_FILE_COUNT: usize = 9;

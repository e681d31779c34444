mod common;

use std::fs;

use common::{build_fixture, files_in, mirror_cli, FIXTURE_FILE_COUNT};

#[test]
fn second_backup_applies_only_the_new_files() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    build_fixture(src.path());

    mirror_cli().arg("mirror").arg("backup").arg(dest.path()).arg(src.path()).assert().success();

    fs::write(src.path().join("one/NewFile1"), "New file 1").unwrap();
    fs::create_dir_all(src.path().join("two/NewDir1/NewDir2")).unwrap();
    fs::write(src.path().join("two/NewDir1/NewDir2/NewFile2"), "New file 2").unwrap();

    mirror_cli().arg("mirror").arg("backup").arg(dest.path()).arg(src.path()).assert().success();

    let content_dir = dest.path().join("Content");
    assert_eq!(files_in(&content_dir).count(), FIXTURE_FILE_COUNT + 2);

    mirror_cli().arg("mirror").arg("validate").arg(dest.path()).arg("--complete").assert().success();
}

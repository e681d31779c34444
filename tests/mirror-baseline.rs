mod common;

use common::{build_fixture, files_in, mirror_cli, FIXTURE_FILE_COUNT};

#[test]
fn baseline_backup_validates_clean_in_both_modes() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    build_fixture(src.path());

    mirror_cli()
        .arg("mirror")
        .arg("backup")
        .arg(dest.path())
        .arg(src.path())
        .assert()
        .success();

    let content_dir = dest.path().join("Content");
    assert_eq!(files_in(&content_dir).count(), FIXTURE_FILE_COUNT);

    mirror_cli()
        .arg("mirror")
        .arg("validate")
        .arg(dest.path())
        .assert()
        .success();

    mirror_cli()
        .arg("mirror")
        .arg("validate")
        .arg(dest.path())
        .arg("--complete")
        .assert()
        .success();
}

mod common;

use common::{build_fixture, mirror_cli};

#[test]
fn deleting_from_destination_needs_force_to_restore() {
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    build_fixture(src.path());

    mirror_cli().arg("mirror").arg("backup").arg(dest.path()).arg(src.path()).assert().success();

    let mapped_a = dest
        .path()
        .join("Content")
        .join(src.path().strip_prefix("/").expect("tempdir is absolute"))
        .join("one/A");
    std::fs::remove_file(&mapped_a).unwrap();

    // Non-force: the persisted snapshot still claims "one/A" exists, so
    // there's no diff to apply, but the deletion is now visible as a gap.
    mirror_cli().arg("mirror").arg("backup").arg(dest.path()).arg(src.path()).assert().success();
    assert!(!mapped_a.exists());

    mirror_cli()
        .arg("mirror")
        .arg("validate")
        .arg(dest.path())
        .assert()
        .failure();

    // Force: restream everything, restoring the missing content.
    mirror_cli().arg("mirror").arg("backup").arg("--force").arg(dest.path()).arg(src.path()).assert().success();
    assert!(mapped_a.is_file());

    mirror_cli().arg("mirror").arg("validate").arg(dest.path()).arg("--complete").assert().success();
}

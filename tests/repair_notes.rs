//! `repair-notes` re-derives bindings the namespace lost.

mod fixtures;

use assert_cmd::Command;
use fixtures::{TFS_PATH, TFS_URL, commit_file, init_repo};

use tfsync::git::notes::NotesStore;
use tfsync::remote::TfvcRemote;

fn tfsync() -> Command {
    let mut cmd = Command::cargo_bin("tfsync").expect("binary");
    cmd.env_remove("TFSYNC_TFVC_CLIENT");
    cmd
}

#[test]
fn repairs_bindings_from_legacy_trailers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    let imported = commit_file(
        &repo,
        "a.txt",
        "1",
        &format!("imported change\n\ngit-tfs-id: [{TFS_URL}]{TFS_PATH};C123\n"),
    );
    let plain = commit_file(&repo, "a.txt", "2", "no metadata here");

    tfsync()
        .args(["repair-notes", "--workspace-root"])
        .arg(dir.path())
        .assert()
        .code(0)
        .stdout(predicates::str::contains("repaired 1"));

    let notes = NotesStore::new(&repo);
    let binding = notes.get(imported).expect("get").expect("repaired");
    assert_eq!(binding.changeset_id, 123);
    assert_eq!(binding.tfs_url, TFS_URL);
    assert!(notes.get(plain).expect("get").is_none());
}

#[test]
fn binds_explicit_pair_for_crash_recovery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    let orphaned = commit_file(&repo, "a.txt", "1", "accepted but never bound");
    TfvcRemote::new("default", TFS_URL, TFS_PATH)
        .save(&repo)
        .expect("save remote");

    tfsync()
        .args([
            "repair-notes",
            "--changeset",
            "6",
            "--commit",
            &orphaned.to_string(),
            "--workspace-root",
        ])
        .arg(dir.path())
        .assert()
        .code(0);

    let notes = NotesStore::new(&repo);
    assert_eq!(
        notes.get(orphaned).expect("get").expect("bound").changeset_id,
        6
    );
}

#[test]
fn existing_bindings_are_left_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    let commit = commit_file(
        &repo,
        "a.txt",
        "1",
        &format!("change\n\ngit-tfs-id: [{TFS_URL}]{TFS_PATH};C50\n"),
    );
    // Already bound with a different (authoritative) changeset.
    NotesStore::new(&repo)
        .put(commit, TFS_URL, TFS_PATH, 51)
        .expect("bind");

    tfsync()
        .args(["repair-notes", "--workspace-root"])
        .arg(dir.path())
        .assert()
        .code(0)
        .stdout(predicates::str::contains("repaired 0"));

    let binding = NotesStore::new(&repo)
        .get(commit)
        .expect("get")
        .expect("bound");
    assert_eq!(binding.changeset_id, 51, "repair must not clobber bindings");
}

//! Binding storage round-trips and namespace wiring.

mod fixtures;

use fixtures::{TFS_PATH, TFS_URL, commit_file, init_bare_repo, init_repo};

use tfsync::git::notes::{
    NOTES_REF, NotesStore, configure_remote_to_sync, notes_refspec_configured,
};

#[test]
fn put_then_get_returns_the_same_binding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    let commit = commit_file(&repo, "a.txt", "1", "first");

    let notes = NotesStore::new(&repo);
    notes.put(commit, TFS_URL, TFS_PATH, 42).expect("put");

    let binding = notes.get(commit).expect("get").expect("present");
    assert_eq!(binding.changeset_id, 42);
    assert_eq!(binding.tfs_url, TFS_URL);
    assert_eq!(binding.tfs_path, TFS_PATH);
    assert_eq!(binding.commit, commit);
}

#[test]
fn get_returns_none_for_unbound_commit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    let commit = commit_file(&repo, "a.txt", "1", "first");

    let notes = NotesStore::new(&repo);
    assert!(notes.get(commit).expect("get").is_none());
}

#[test]
fn put_overwrites_existing_binding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    let commit = commit_file(&repo, "a.txt", "1", "first");

    let notes = NotesStore::new(&repo);
    notes.put(commit, TFS_URL, TFS_PATH, 41).expect("put");
    notes.put(commit, TFS_URL, TFS_PATH, 42).expect("overwrite");

    let binding = notes.get(commit).expect("get").expect("present");
    assert_eq!(binding.changeset_id, 42);
}

#[test]
fn binding_does_not_change_the_commit_hash() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    let before = commit_file(&repo, "a.txt", "1", "first");

    let notes = NotesStore::new(&repo);
    notes.put(before, TFS_URL, TFS_PATH, 7).expect("put");

    let after = repo
        .head()
        .expect("head")
        .peel_to_commit()
        .expect("commit")
        .id();
    assert_eq!(before, after);
}

#[test]
fn configure_remote_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let remote_dir = tempfile::tempdir().expect("remote dir");
    init_bare_repo(remote_dir.path());
    let repo = init_repo(dir.path());
    fixtures::add_origin(&repo, remote_dir.path());

    assert!(!notes_refspec_configured(&repo, "origin").expect("query"));
    assert!(configure_remote_to_sync(&repo, "origin").expect("first wire"));
    assert!(notes_refspec_configured(&repo, "origin").expect("query"));

    // Second call adds nothing.
    assert!(!configure_remote_to_sync(&repo, "origin").expect("second wire"));

    let remote = repo.find_remote("origin").expect("origin");
    let fetch_count = remote
        .fetch_refspecs()
        .expect("refspecs")
        .iter()
        .flatten()
        .filter(|spec| spec.contains(NOTES_REF))
        .count();
    assert_eq!(fetch_count, 1);
}

#[test]
fn refspec_query_tolerates_missing_remote() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(dir.path());
    assert!(!notes_refspec_configured(&repo, "origin").expect("query"));
}

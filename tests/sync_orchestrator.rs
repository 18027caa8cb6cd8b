//! Orchestrated sync runs against a real git remote.

mod fixtures;

use fixtures::{
    FakeTfvcClient, TFS_PATH, TFS_URL, bind, commit_file, configure_workspace, git,
    init_bare_repo, init_repo,
};
use git2::Repository;

use tfsync::context::Context;
use tfsync::git::notes::{NOTES_REF, NotesStore};
use tfsync::lock::LockCoordinator;
use tfsync::sync::{self, SyncDirection, SyncError, SyncOptions};
use tfsync::{Error, remote::TfvcRemote};

fn sync_options(direction: SyncDirection) -> SyncOptions {
    SyncOptions {
        direction,
        remote_id: "default".to_string(),
        ..SyncOptions::default()
    }
}

/// S1 end to end: fetch no-ops, merge no-ops, one commit checked in, commits
/// and notes pushed, lock released.
#[test]
fn bidirectional_run_checks_in_and_pushes() {
    let work = tempfile::tempdir().expect("workdir");
    let origin = tempfile::tempdir().expect("origin dir");
    init_bare_repo(origin.path());

    let repo = init_repo(work.path());
    let base = commit_file(&repo, "a.txt", "1", "base");
    let mut remote = configure_workspace(&repo, origin.path());
    bind(&repo, &mut remote, base, 5);
    git(work.path(), &["push", "-u", "origin", "master"]);

    let feature = commit_file(&repo, "a.txt", "2", "feature work");

    let mut ctx = Context::open(work.path(), "ws").expect("context");
    let mut client = FakeTfvcClient::new(6);
    let summary = sync::run(&mut ctx, &mut client, &sync_options(SyncDirection::Bidirectional))
        .expect("sync");

    assert_eq!(summary.checked_in, 1);
    assert_eq!(summary.last_changeset_id, Some(6));
    assert!(summary.pushed);

    let notes = NotesStore::new(ctx.repo());
    assert_eq!(
        notes.get(feature).expect("get").expect("bound").changeset_id,
        6
    );

    let reloaded = TfvcRemote::load(ctx.repo(), "default")
        .expect("load")
        .expect("some");
    assert_eq!(reloaded.max_changeset_id, 6);
    assert_eq!(reloaded.max_commit, Some(feature));

    // The notes namespace reached the remote.
    let origin_repo = Repository::open(origin.path()).expect("open origin");
    assert!(origin_repo.refname_to_id(NOTES_REF).is_ok());

    // The lock is released after the run.
    let coordinator = LockCoordinator::new(work.path());
    assert!(coordinator.get_info("ws").expect("get_info").is_none());
}

#[test]
fn from_tfvc_run_only_fetches() {
    let work = tempfile::tempdir().expect("workdir");
    let origin = tempfile::tempdir().expect("origin dir");
    init_bare_repo(origin.path());

    let repo = init_repo(work.path());
    let base = commit_file(&repo, "a.txt", "1", "base");
    let mut remote = configure_workspace(&repo, origin.path());
    bind(&repo, &mut remote, base, 5);
    commit_file(&repo, "a.txt", "2", "local work");

    let mut ctx = Context::open(work.path(), "ws").expect("context");
    let mut client = FakeTfvcClient::new(7);
    client.pending.push(fixtures::PendingChangeset {
        changeset_id: 6,
        message: "server change".to_string(),
    });

    let summary = sync::run(&mut ctx, &mut client, &sync_options(SyncDirection::FromTfvc))
        .expect("sync");
    assert_eq!(summary.fetched_changesets, 1);
    assert_eq!(summary.checked_in, 0);
    assert!(!summary.pushed);
    assert!(client.checkins.is_empty(), "fetch-only must not check in");

    let reloaded = TfvcRemote::load(ctx.repo(), "default")
        .expect("load")
        .expect("some");
    assert_eq!(reloaded.max_changeset_id, 6);
}

#[test]
fn missing_notes_refspec_is_a_precondition_failure() {
    let work = tempfile::tempdir().expect("workdir");
    let origin = tempfile::tempdir().expect("origin dir");
    init_bare_repo(origin.path());

    let repo = init_repo(work.path());
    commit_file(&repo, "a.txt", "1", "base");
    fixtures::add_origin(&repo, origin.path());
    // Descriptor configured, but the namespace was never wired.
    TfvcRemote::new("default", TFS_URL, TFS_PATH)
        .save(&repo)
        .expect("save remote");

    let mut ctx = Context::open(work.path(), "ws").expect("context");
    let mut client = FakeTfvcClient::new(6);
    let err = sync::run(&mut ctx, &mut client, &sync_options(SyncDirection::Bidirectional))
        .expect_err("must fail");
    assert_eq!(err.exit_code(), 1);
    assert!(matches!(
        err,
        Error::Sync(SyncError::PreconditionFailed { .. })
    ));
}

#[test]
fn unconfigured_remote_is_a_precondition_failure() {
    let work = tempfile::tempdir().expect("workdir");
    let origin = tempfile::tempdir().expect("origin dir");
    init_bare_repo(origin.path());

    let repo = init_repo(work.path());
    commit_file(&repo, "a.txt", "1", "base");
    fixtures::add_origin(&repo, origin.path());
    tfsync::git::notes::configure_remote_to_sync(&repo, "origin").expect("wire notes");

    let mut ctx = Context::open(work.path(), "ws").expect("context");
    let mut client = FakeTfvcClient::new(6);
    let mut options = sync_options(SyncDirection::Bidirectional);
    options.remote_id = "nope".to_string();
    let err = sync::run(&mut ctx, &mut client, &options).expect_err("must fail");
    assert_eq!(err.exit_code(), 1);
    assert!(matches!(
        err,
        Error::Sync(SyncError::NoConfiguredRemote { .. })
    ));
}

#[test]
fn held_lock_maps_to_exit_code_three() {
    let work = tempfile::tempdir().expect("workdir");
    let origin = tempfile::tempdir().expect("origin dir");
    init_bare_repo(origin.path());

    let repo = init_repo(work.path());
    let base = commit_file(&repo, "a.txt", "1", "base");
    let mut remote = configure_workspace(&repo, origin.path());
    bind(&repo, &mut remote, base, 5);

    let coordinator = LockCoordinator::new(work.path());
    let _held = coordinator
        .try_acquire(
            "ws",
            std::time::Duration::from_secs(1),
            tfsync::lock::LockRecord::capture("ws", "other-agent", SyncDirection::Bidirectional),
        )
        .expect("hold lock");

    let mut ctx = Context::open(work.path(), "ws").expect("context");
    let mut client = FakeTfvcClient::new(6);
    let mut options = sync_options(SyncDirection::Bidirectional);
    options.lock.timeout = std::time::Duration::ZERO;
    let err = sync::run(&mut ctx, &mut client, &options).expect_err("lock contention");
    assert_eq!(err.exit_code(), 3);
}

/// A conflicting pull halts with a report and leaves the tree conflicted.
#[test]
fn conflicting_pull_halts_with_report() {
    let work = tempfile::tempdir().expect("workdir");
    let origin = tempfile::tempdir().expect("origin dir");
    init_bare_repo(origin.path());

    let repo = init_repo(work.path());
    let base = commit_file(&repo, "a.txt", "line one\n", "base");
    let mut remote = configure_workspace(&repo, origin.path());
    bind(&repo, &mut remote, base, 5);
    git(work.path(), &["push", "-u", "origin", "master"]);

    // A second agent pushes a conflicting change.
    let other = tempfile::tempdir().expect("other workdir");
    let other_repo = init_repo(other.path());
    fixtures::add_origin(&other_repo, origin.path());
    git(other.path(), &["pull", "origin", "master"]);
    commit_file(&other_repo, "a.txt", "line one changed remotely\n", "remote edit");
    git(other.path(), &["push", "origin", "HEAD:master"]);

    // Our agent edits the same line.
    commit_file(&repo, "a.txt", "line one changed locally\n", "local edit");

    let mut ctx = Context::open(work.path(), "ws").expect("context");
    let mut client = FakeTfvcClient::new(6);
    let err = sync::run(&mut ctx, &mut client, &sync_options(SyncDirection::ToTfvc))
        .expect_err("conflicting pull");
    assert_eq!(err.exit_code(), 2);
    match err {
        Error::Sync(SyncError::MergeConflict { report, paths }) => {
            assert!(paths.iter().any(|p| p == "a.txt"));
            assert!(report.contains("a.txt"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The working tree is left conflicted for the operator.
    assert!(tfsync::git::merge::has_conflicts(ctx.repo()).expect("conflicts"));
}

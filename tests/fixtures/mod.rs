//! Shared test fixtures: scratch git repositories and a fake TFVC client.

#![allow(dead_code)]

use std::path::Path;

use git2::{Oid, Repository, Signature};

use tfsync::context::Context;
use tfsync::git::notes::NotesStore;
use tfsync::remote::TfvcRemote;
use tfsync::tfvc::{CheckinRequest, FetchSummary, TfvcClient, TfvcError};

pub const TFS_URL: &str = "https://tfs.example/tfs";
pub const TFS_PATH: &str = "$/Proj/Main";

pub fn init_repo(path: &Path) -> Repository {
    let repo = Repository::init(path).expect("git init");
    let mut cfg = repo.config().expect("repo config");
    cfg.set_str("user.name", "Test").expect("user.name");
    cfg.set_str("user.email", "test@test.com").expect("user.email");
    // Pin the branch name; the host's init.defaultBranch must not leak in.
    repo.set_head("refs/heads/master").expect("set head");
    repo
}

/// Run git in a test repo, asserting success.
pub fn git(repo_root: &Path, args: &[&str]) {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn init_bare_repo(path: &Path) {
    Repository::init_bare(path).expect("git init --bare");
}

pub fn add_origin(repo: &Repository, remote_dir: &Path) {
    let url = remote_dir.to_str().expect("utf8 remote path");
    repo.remote("origin", url).expect("remote add origin");
}

fn signature() -> Signature<'static> {
    Signature::now("Test", "test@test.com").expect("signature")
}

/// Commit a file change on HEAD.
pub fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> Oid {
    let workdir = repo.workdir().expect("workdir");
    std::fs::write(workdir.join(name), content).expect("write file");

    let mut index = repo.index().expect("index");
    index.add_path(Path::new(name)).expect("index add");
    index.write().expect("index write");
    let tree_oid = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_oid).expect("find tree");

    let sig = signature();
    let parents: Vec<git2::Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().expect("head commit")],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .expect("commit")
}

/// Commit with an explicit author identity.
pub fn commit_file_as(
    repo: &Repository,
    name: &str,
    content: &str,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Oid {
    let workdir = repo.workdir().expect("workdir");
    std::fs::write(workdir.join(name), content).expect("write file");

    let mut index = repo.index().expect("index");
    index.add_path(Path::new(name)).expect("index add");
    index.write().expect("index write");
    let tree_oid = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_oid).expect("find tree");

    let author = Signature::now(author_name, author_email).expect("author");
    let committer = signature();
    let parents: Vec<git2::Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().expect("head commit")],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &author, &committer, message, &tree, &parent_refs)
        .expect("commit")
}

/// Create a commit on an arbitrary ref without touching the working tree,
/// reusing the parent's tree. Stands in for a changeset the TFVC client
/// materialized.
pub fn commit_on_ref(repo: &Repository, refname: &str, parent: Oid, message: &str) -> Oid {
    let parent_commit = repo.find_commit(parent).expect("parent commit");
    let tree = parent_commit.tree().expect("parent tree");
    let sig = signature();
    repo.commit(Some(refname), &sig, &sig, message, &tree, &[&parent_commit])
        .expect("commit on ref")
}

/// Like [`commit_on_ref`], with an explicit author identity.
pub fn commit_on_ref_as(
    repo: &Repository,
    refname: &str,
    parent: Oid,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Oid {
    let parent_commit = repo.find_commit(parent).expect("parent commit");
    let tree = parent_commit.tree().expect("parent tree");
    let author = Signature::now(author_name, author_email).expect("author");
    let committer = signature();
    repo.commit(
        Some(refname),
        &author,
        &committer,
        message,
        &tree,
        &[&parent_commit],
    )
    .expect("commit on ref")
}

/// Merge commit on HEAD with the given parents, using the first parent's
/// tree (content is irrelevant to the sync engine's bookkeeping).
pub fn merge_commit(repo: &Repository, message: &str, parents: &[Oid]) -> Oid {
    let commits: Vec<git2::Commit<'_>> = parents
        .iter()
        .map(|oid| repo.find_commit(*oid).expect("parent"))
        .collect();
    let tree = commits[0].tree().expect("tree");
    let parent_refs: Vec<&git2::Commit<'_>> = commits.iter().collect();
    let sig = signature();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .expect("merge commit")
}

/// Wire the notes refspecs the way `init-workspace` does.
pub fn configure_workspace(repo: &Repository, remote_dir: &Path) -> TfvcRemote {
    add_origin(repo, remote_dir);
    tfsync::git::notes::configure_remote_to_sync(repo, "origin").expect("notes refspec");
    let remote = TfvcRemote::new("default", TFS_URL, TFS_PATH);
    remote.save(repo).expect("save remote");
    remote
}

/// Bind a commit and advance the descriptor's watermark, as a completed
/// fetch or checkin would have.
pub fn bind(repo: &Repository, remote: &mut TfvcRemote, commit: Oid, changeset_id: u64) {
    let notes = NotesStore::new(repo);
    notes
        .put(commit, &remote.tfs_url, &remote.tfs_path, changeset_id)
        .expect("bind");
    remote.advance_watermark(commit, changeset_id);
    remote.save_watermark(repo).expect("save watermark");
}

#[derive(Debug, Clone)]
pub struct CheckinCall {
    pub commit: Oid,
    pub parent: Oid,
    pub parent_changeset: Option<u64>,
    pub author: String,
    pub merged_branch_path: Option<String>,
    pub message: String,
}

/// Changeset queued for the next fetch.
pub struct PendingChangeset {
    pub changeset_id: u64,
    pub message: String,
}

/// In-memory TFVC server double. Fetch materializes queued changesets on
/// the remote-tracking ref; checkin hands out sequential changeset ids and
/// records every call.
#[derive(Default)]
pub struct FakeTfvcClient {
    pub next_changeset: u64,
    pub server_max: u64,
    pub pending: Vec<PendingChangeset>,
    pub checkins: Vec<CheckinCall>,
    /// Reject the Nth checkin call (0-based).
    pub fail_checkin_at: Option<usize>,
}

impl FakeTfvcClient {
    pub fn new(next_changeset: u64) -> Self {
        Self {
            next_changeset,
            server_max: next_changeset.saturating_sub(1),
            ..Self::default()
        }
    }
}

impl TfvcClient for FakeTfvcClient {
    fn fetch(&mut self, ctx: &Context, remote: &mut TfvcRemote) -> Result<FetchSummary, TfvcError> {
        let repo = ctx.repo();
        let notes = NotesStore::new(repo);
        let mut fetched = 0;
        for pending in self.pending.drain(..) {
            let parent = remote
                .max_commit
                .expect("fake fetch needs a watermark commit");
            let oid = commit_on_ref(repo, &remote.remote_ref, parent, &pending.message);
            notes
                .put(oid, &remote.tfs_url, &remote.tfs_path, pending.changeset_id)
                .map_err(|e| TfvcError::Rpc(e.to_string()))?;
            remote.advance_watermark(oid, pending.changeset_id);
            self.server_max = self.server_max.max(pending.changeset_id);
            fetched += 1;
        }
        remote
            .save_watermark(repo)
            .map_err(|e| TfvcError::Rpc(e.to_string()))?;
        Ok(FetchSummary {
            new_changesets: fetched,
        })
    }

    fn max_changeset_id(&mut self, _remote: &TfvcRemote) -> Result<u64, TfvcError> {
        Ok(self.server_max)
    }

    fn checkin(&mut self, request: &CheckinRequest<'_>) -> Result<u64, TfvcError> {
        let position = self.checkins.len();
        self.checkins.push(CheckinCall {
            commit: request.commit,
            parent: request.parent_commit,
            parent_changeset: request.parent_binding.map(|b| b.changeset_id),
            author: request.author.clone(),
            merged_branch_path: request.merged_branch_path.clone(),
            message: request.message.clone(),
        });
        if self.fail_checkin_at == Some(position) {
            return Err(TfvcError::CheckinRejected {
                commit: request.commit,
                reason: "injected failure".to_string(),
            });
        }
        let id = self.next_changeset;
        self.next_changeset += 1;
        self.server_max = self.server_max.max(id);
        Ok(id)
    }
}

//! Binding storage in the notes namespace.
//!
//! A binding associates a commit hash with the TFVC changeset it came from
//! (or was checked into). Bindings live in `refs/notes/tfvc-sync` so they
//! never participate in commit identity: the same commit keeps the same hash
//! no matter how many round-trips it survives. The note body is line-oriented
//! `key=value` text.

use git2::{Oid, Repository, Signature};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::error::GitError;

/// Namespace holding one binding per commit.
pub const NOTES_REF: &str = "refs/notes/tfvc-sync";

/// Refspec that mirrors the namespace to/from a remote.
pub const NOTES_REFSPEC: &str = "+refs/notes/tfvc-sync:refs/notes/tfvc-sync";

/// Immutable association between a commit and a server changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetBinding {
    pub changeset_id: u64,
    pub tfs_url: String,
    pub tfs_path: String,
    pub commit: Oid,
    pub synced_at: Option<OffsetDateTime>,
}

impl ChangesetBinding {
    fn to_payload(&self) -> String {
        let synced_at = self
            .synced_at
            .and_then(|at| at.format(&Rfc3339).ok())
            .unwrap_or_default();
        format!(
            "changeset={}\ntfs_url={}\ntfs_path={}\nsynced_at={}\n",
            self.changeset_id, self.tfs_url, self.tfs_path, synced_at
        )
    }

    /// Parse a note body. Requires a positive `changeset`; empty `tfs_url`
    /// and `tfs_path` are kept as empty strings. Unknown keys are ignored.
    pub fn parse(commit: Oid, payload: &str) -> Result<Self, String> {
        let mut changeset_id = None;
        let mut tfs_url = String::new();
        let mut tfs_path = String::new();
        let mut synced_at = None;

        for line in payload.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "changeset" => match value.trim().parse::<u64>() {
                    Ok(id) if id > 0 => changeset_id = Some(id),
                    _ => return Err(format!("changeset is not a positive integer: {value:?}")),
                },
                "tfs_url" => tfs_url = value.trim().to_string(),
                "tfs_path" => tfs_path = value.trim().to_string(),
                "synced_at" => {
                    synced_at = OffsetDateTime::parse(value.trim(), &Rfc3339).ok();
                }
                _ => {}
            }
        }

        Ok(Self {
            changeset_id: changeset_id.ok_or("missing changeset key")?,
            tfs_url,
            tfs_path,
            commit,
            synced_at,
        })
    }
}

/// Reads and writes bindings for one repository.
pub struct NotesStore<'repo> {
    repo: &'repo Repository,
}

impl<'repo> NotesStore<'repo> {
    pub fn new(repo: &'repo Repository) -> Self {
        Self { repo }
    }

    /// Write or replace the binding for `commit`. Bindings are immutable in
    /// value terms: any two valid bindings for the same commit are equal, so
    /// overwrite is safe.
    pub fn put(
        &self,
        commit: Oid,
        tfs_url: &str,
        tfs_path: &str,
        changeset_id: u64,
    ) -> Result<ChangesetBinding, GitError> {
        let binding = ChangesetBinding {
            changeset_id,
            tfs_url: tfs_url.to_string(),
            tfs_path: tfs_path.to_string(),
            commit,
            synced_at: Some(OffsetDateTime::now_utc()),
        };
        let sig = self.signature()?;
        self.repo
            .note(&sig, &sig, Some(NOTES_REF), commit, &binding.to_payload(), true)
            .map_err(|source| GitError::BindingWrite { commit, source })?;
        tracing::debug!(%commit, changeset = changeset_id, "binding written");
        Ok(binding)
    }

    /// Read the binding for `commit`, if any. A malformed note is reported
    /// as absent with a warning; callers fall back to legacy message parsing.
    pub fn get(&self, commit: Oid) -> Result<Option<ChangesetBinding>, GitError> {
        let note = match self.repo.find_note(Some(NOTES_REF), commit) {
            Ok(note) => note,
            Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(GitError::Git(err)),
        };
        let Some(payload) = note.message() else {
            return Ok(None);
        };
        match ChangesetBinding::parse(commit, payload) {
            Ok(binding) => Ok(Some(binding)),
            Err(reason) => {
                tracing::warn!(%commit, %reason, "ignoring malformed binding note");
                Ok(None)
            }
        }
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(Signature::now("tfsync", "tfsync@localhost")?),
        }
    }
}

/// Wire the notes namespace into the remote's fetch and push refspec lists.
/// Idempotent: returns `false` when both refspecs were already present.
pub fn configure_remote_to_sync(repo: &Repository, remote_name: &str) -> Result<bool, GitError> {
    let remote = repo.find_remote(remote_name)?;

    let has_fetch = remote
        .fetch_refspecs()?
        .iter()
        .flatten()
        .any(|spec| spec.contains(NOTES_REF));
    let has_push = remote
        .push_refspecs()?
        .iter()
        .flatten()
        .any(|spec| spec.contains(NOTES_REF));
    drop(remote);

    let mut added = false;
    if !has_fetch {
        repo.remote_add_fetch(remote_name, NOTES_REFSPEC)?;
        added = true;
    }
    if !has_push {
        repo.remote_add_push(remote_name, NOTES_REFSPEC)?;
        added = true;
    }
    Ok(added)
}

/// Whether the namespace is wired for fetch on the given remote. Sync entry
/// points require this before touching the server.
pub fn notes_refspec_configured(repo: &Repository, remote_name: &str) -> Result<bool, GitError> {
    let remote = match repo.find_remote(remote_name) {
        Ok(remote) => remote,
        Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(false),
        Err(err) => return Err(GitError::Git(err)),
    };
    Ok(remote
        .fetch_refspecs()?
        .iter()
        .flatten()
        .any(|spec| spec.contains(NOTES_REF)))
}

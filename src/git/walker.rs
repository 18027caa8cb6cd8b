//! Ancestor traversal over the commit DAG.
//!
//! Finds the nearest ancestors of a commit that carry a binding. A bound
//! commit terminates its branch of the walk; unbound commits (say, an
//! interposed `.gitignore` commit on top of a bound ancestor) are traversed
//! through. Parents are pushed in reverse so the LIFO stack processes the
//! first parent first, keeping main-line bindings ahead of merged-branch
//! bindings in the result.

use std::collections::HashSet;

use git2::{Oid, Repository};

use super::error::GitError;
use super::notes::{ChangesetBinding, NotesStore};
use crate::remote::{TfvcRemote, resolve_remote};

/// Nearest ancestor bindings of `head`, first-parent line first.
pub fn find_last_parent_bindings(
    repo: &Repository,
    notes: &NotesStore<'_>,
    head: Oid,
) -> Result<Vec<ChangesetBinding>, GitError> {
    let mut stack = vec![head];
    let mut visited = HashSet::new();
    let mut found = Vec::new();

    while let Some(oid) = stack.pop() {
        if !visited.insert(oid) {
            continue;
        }
        if let Some(binding) = notes.get(oid)? {
            found.push(binding);
            continue;
        }
        let commit = repo.find_commit(oid)?;
        let parents: Vec<Oid> = commit.parent_ids().collect();
        for parent in parents.into_iter().rev() {
            stack.push(parent);
        }
    }

    Ok(found)
}

/// Advance `remote`'s watermark through any ancestor bindings of `head` that
/// belong to it and sit above the current watermark. Applied in ascending
/// changeset order so every intermediate pair is observed.
pub fn move_remote_forward_if_needed(
    repo: &Repository,
    notes: &NotesStore<'_>,
    all_remotes: &[TfvcRemote],
    remote: &mut TfvcRemote,
    head: Oid,
) -> Result<bool, GitError> {
    let bindings = find_last_parent_bindings(repo, notes, head)?;

    let mut ahead: Vec<&ChangesetBinding> = bindings
        .iter()
        .filter(|binding| {
            let (resolved, _) = resolve_remote(all_remotes, &binding.tfs_url, &binding.tfs_path);
            resolved.id == remote.id && binding.changeset_id > remote.max_changeset_id
        })
        .collect();
    ahead.sort_by_key(|binding| binding.changeset_id);

    let mut moved = false;
    for binding in ahead {
        tracing::debug!(
            remote = %remote.id,
            changeset = binding.changeset_id,
            commit = %binding.commit,
            "watermark advanced from ancestor binding"
        );
        remote.advance_watermark(binding.commit, binding.changeset_id);
        moved = true;
    }
    if moved {
        remote.save_watermark(repo)?;
    }
    Ok(moved)
}

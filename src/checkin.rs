//! Replaying unbound commits onto TFVC.
//!
//! The driver walks the first-parent path between the remote's watermark and
//! a target ref, checks each unbound commit in, and binds the server's
//! changeset id to the existing commit hash. No commit is ever recreated:
//! the binding lives in the notes namespace, so the hash survives.
//!
//! Re-execution after a partial failure is safe because of the idempotency
//! gate: a commit that already carries a binding is skipped. The one window
//! this gate cannot cover is a crash between the server accepting a
//! changeset and the local binding write; recovery then needs the changeset
//! index full scan plus `repair-notes` (see DESIGN.md).

use git2::{Commit, Oid, Repository, Sort};

use crate::context::Context;
use crate::git::error::GitError;
use crate::git::index::{ChangesetIndex, strip_legacy_trailers};
use crate::git::notes::{ChangesetBinding, NotesStore};
use crate::git::process::run_git;
use crate::git::walker::find_last_parent_bindings;
use crate::remote::{TfvcRemote, resolve_remote};
use crate::sync::SyncError;
use crate::tfvc::{AuthorMap, CheckinOptions, CheckinRequest, TfvcClient};

#[derive(Debug, Default)]
pub struct CheckinSummary {
    /// `(commit, changeset_id)` pairs created this run, in order.
    pub checked_in: Vec<(Oid, u64)>,
    /// Commits skipped by the idempotency gate.
    pub already_bound: usize,
    /// Integration merges materialized via the merged-branch hint.
    pub merges_skipped: usize,
}

impl CheckinSummary {
    pub fn last_changeset_id(&self) -> Option<u64> {
        self.checked_in.last().map(|(_, id)| *id)
    }
}

/// Classification of a merge commit's non-first parents.
#[derive(Debug, Default)]
struct MergedParents {
    /// Parents whose nearest ancestor binding belongs to the remote, with
    /// that binding.
    resolved: Vec<(Oid, ChangesetBinding)>,
    /// Parents with no binding on this remote anywhere in their ancestry.
    unresolved: Vec<Oid>,
    /// Resolved parents that are not themselves bound (the branch still has
    /// commits TFVC has never seen).
    with_unbound_commits: usize,
}

impl MergedParents {
    /// True for an integration merge: every merged parent is itself bound,
    /// so the merge adds no content the server lacks.
    fn all_directly_bound(&self) -> bool {
        !self.resolved.is_empty() && self.unresolved.is_empty() && self.with_unbound_commits == 0
    }
}

pub struct CheckinDriver<'a> {
    ctx: &'a Context,
    client: &'a mut dyn TfvcClient,
    index: &'a mut ChangesetIndex,
}

impl<'a> CheckinDriver<'a> {
    pub fn new(
        ctx: &'a Context,
        client: &'a mut dyn TfvcClient,
        index: &'a mut ChangesetIndex,
    ) -> Self {
        Self { ctx, client, index }
    }

    /// Check in everything between `remote`'s watermark and `target_ref`.
    ///
    /// Returns [`SyncError::NothingToCheckin`] when the range is empty or
    /// fully covered by existing bindings; callers treat that as success.
    pub fn checkin(
        &mut self,
        target_ref: &str,
        remote: &mut TfvcRemote,
        options: &CheckinOptions,
    ) -> Result<CheckinSummary, SyncError> {
        let repo = self.ctx.repo();
        let notes = NotesStore::new(repo);

        if !skip_precheckin_fetch(options) {
            let cached = remote.max_changeset_id;
            self.client.fetch(self.ctx, remote)?;
            let server_max = self
                .client
                .max_changeset_id(remote)?
                .max(remote.max_changeset_id);
            if server_max > cached {
                if options.auto_rebase {
                    tracing::info!(
                        cached,
                        server = server_max,
                        "remote advanced; rebasing onto {}",
                        remote.remote_ref
                    );
                    self.rebase_onto_remote(remote)?;
                } else {
                    return Err(SyncError::RemoteAdvanced {
                        cached,
                        server: server_max,
                    });
                }
            }
        }

        let target = repo
            .revparse_single(target_ref)
            .map_err(GitError::Git)?
            .peel_to_commit()
            .map_err(GitError::Git)?
            .id();
        let commits = first_parent_path(repo, target, remote.max_commit)?;
        if commits.is_empty() {
            return Err(SyncError::NothingToCheckin);
        }

        let author_map = load_author_map(options)?;
        let all_remotes = TfvcRemote::load_all(repo)?;

        let mut summary = CheckinSummary::default();
        let mut running_parent = remote.max_commit;
        let mut parent_binding: Option<ChangesetBinding> = match running_parent {
            Some(parent) => notes.get(parent)?,
            None => None,
        };

        for (position, &oid) in commits.iter().enumerate() {
            if self.ctx.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            // Idempotency gate: re-execution after a partial failure lands
            // here and walks forward to the first unbound commit.
            if let Some(existing) = notes.get(oid)? {
                tracing::info!(commit = %oid, changeset = existing.changeset_id, "already synced");
                running_parent = Some(oid);
                parent_binding = Some(existing);
                summary.already_bound += 1;
                continue;
            }

            let commit = repo.find_commit(oid).map_err(GitError::Git)?;

            let mut merged_author: Option<(String, String)> = None;
            let mut own_merge_hint: Option<String> = None;
            if commit.parent_count() > 1 {
                let merged = self.resolve_merged_parents(
                    repo,
                    &notes,
                    &commit,
                    running_parent,
                    remote,
                    &all_remotes,
                )?;

                if merged.all_directly_bound() {
                    // Integration merge: everything it joins is already on
                    // the server, and the hint on the preceding checkin
                    // carried the merge. Nothing to check in as content.
                    tracing::info!(
                        commit = %oid,
                        "merge commit materialized via merged-branch hint; not checked in as content"
                    );
                    running_parent = Some(oid);
                    summary.merges_skipped += 1;
                    continue;
                }

                if merged.resolved.is_empty() {
                    if !options.ignore_merge {
                        return Err(SyncError::UnmergedBranch {
                            commit: oid,
                            parent: merged.unresolved.first().copied().unwrap_or(oid),
                        });
                    }
                    // ignore_merge: plain content, no hint.
                } else {
                    // The merged branch has unbound commits; their content
                    // arrives through this commit's tree, the hint tells
                    // the server which branch was merged.
                    if merged.resolved.len() > 1 {
                        tracing::warn!(
                            commit = %oid,
                            count = merged.resolved.len(),
                            "merge commit has multiple bound parents; using the last"
                        );
                    }
                    own_merge_hint = merged
                        .resolved
                        .last()
                        .map(|(_, binding)| binding.tfs_path.clone());
                }

                // Credit the merged work: the last merged parent's identity
                // feeds the author chain instead of the merge commit's own.
                merged_author = merged
                    .resolved
                    .iter()
                    .map(|(parent, _)| *parent)
                    .chain(merged.unresolved.iter().copied())
                    .filter_map(|parent| repo.find_commit(parent).ok())
                    .last()
                    .map(|c| {
                        let author = c.author();
                        (
                            author.name().unwrap_or_default().to_string(),
                            author.email().unwrap_or_default().to_string(),
                        )
                    });
            }

            let message = self.build_message(repo, running_parent, oid)?;
            let merged_branch_path = match own_merge_hint {
                Some(hint) => Some(hint),
                None => self.lookahead_merge_hint(
                    repo,
                    &notes,
                    commits.get(position + 1).copied(),
                    oid,
                    remote,
                    &all_remotes,
                )?,
            };
            let author = resolve_author(&commit, options, &author_map, merged_author.as_ref());

            if options.dry_run {
                tracing::info!(
                    commit = %oid,
                    author = %author,
                    merged_branch = merged_branch_path.as_deref().unwrap_or("-"),
                    "dry-run: would check in"
                );
                running_parent = Some(oid);
                continue;
            }

            let request = CheckinRequest {
                commit: oid,
                parent_commit: running_parent.unwrap_or_else(Oid::zero),
                parent_binding: parent_binding.as_ref(),
                message,
                author,
                merged_branch_path,
            };

            let changeset_id = match self.client.checkin(&request) {
                Ok(id) => id,
                Err(err) => {
                    if let Some((last_bound, _)) = summary.checked_in.last().copied() {
                        self.cleanup_after_failure(last_bound, oid);
                    }
                    return Err(err.into());
                }
            };

            // Binding step: same, original commit hash. A failure here is
            // fatal and leaves the changeset orphaned on the server; the
            // diagnostics must be loud because recovery needs a full scan.
            let binding = notes
                .put(oid, &remote.tfs_url, &remote.tfs_path, changeset_id)
                .map_err(|source| SyncError::BindingWriteFailed {
                    commit: oid,
                    changeset_id,
                    source: Box::new(source),
                })?;
            self.index.record_pair(changeset_id, oid);
            remote.advance_watermark(oid, changeset_id);
            remote.save_watermark(repo)?;

            tracing::info!(commit = %oid, changeset = changeset_id, "checked in");
            summary.checked_in.push((oid, changeset_id));
            parent_binding = Some(binding);
            running_parent = Some(oid);
        }

        if summary.checked_in.is_empty() {
            return Err(SyncError::NothingToCheckin);
        }
        Ok(summary)
    }

    /// Catch up with the server without losing local work. The rewritten
    /// commits are all unbound, so hash preservation is not violated.
    fn rebase_onto_remote(&self, remote: &TfvcRemote) -> Result<(), SyncError> {
        let output = run_git(
            self.ctx.repo_root(),
            &["rebase", "--rebase-merges", &remote.remote_ref],
        )?;
        if !output.success() {
            return Err(SyncError::Git(GitError::Command {
                args: format!("rebase --rebase-merges {}", remote.remote_ref),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            }));
        }
        Ok(())
    }

    /// Classify the merged parents of `commit` (everything but the running
    /// parent) against `remote`.
    fn resolve_merged_parents(
        &self,
        repo: &Repository,
        notes: &NotesStore<'_>,
        commit: &Commit<'_>,
        running_parent: Option<Oid>,
        remote: &TfvcRemote,
        all_remotes: &[TfvcRemote],
    ) -> Result<MergedParents, SyncError> {
        let mut merged = MergedParents::default();
        for parent in commit.parent_ids() {
            if Some(parent) == running_parent {
                continue;
            }
            let directly_bound = notes.get(parent)?.is_some();
            // First entry is the first-parent-line binding.
            let bindings = find_last_parent_bindings(repo, notes, parent)?;
            let same_remote = bindings.into_iter().next().filter(|binding| {
                let (resolved, _) = resolve_remote(all_remotes, &binding.tfs_url, &binding.tfs_path);
                resolved.id == remote.id
            });
            match same_remote {
                Some(binding) => {
                    merged.resolved.push((parent, binding));
                    if !directly_bound {
                        merged.with_unbound_commits += 1;
                    }
                }
                None => merged.unresolved.push(parent),
            }
        }
        Ok(merged)
    }

    /// When the next commit in the sequence is an integration merge (every
    /// merged parent already bound), the current checkin carries the merged
    /// branch's server path so TFVC materializes the merge. Multiple merged
    /// parents use the last.
    fn lookahead_merge_hint(
        &self,
        repo: &Repository,
        notes: &NotesStore<'_>,
        next: Option<Oid>,
        current: Oid,
        remote: &TfvcRemote,
        all_remotes: &[TfvcRemote],
    ) -> Result<Option<String>, SyncError> {
        let Some(next) = next else { return Ok(None) };
        let next_commit = repo.find_commit(next).map_err(GitError::Git)?;
        if next_commit.parent_count() < 2 {
            return Ok(None);
        }
        if next_commit.parent_ids().next() != Some(current) {
            return Ok(None);
        }
        let merged = self.resolve_merged_parents(
            repo,
            notes,
            &next_commit,
            Some(current),
            remote,
            all_remotes,
        )?;
        if !merged.all_directly_bound() {
            return Ok(None);
        }
        if merged.resolved.len() > 1 {
            tracing::warn!(
                commit = %next,
                count = merged.resolved.len(),
                "merge commit has multiple bound parents; using the last"
            );
        }
        Ok(merged
            .resolved
            .last()
            .map(|(_, binding)| binding.tfs_path.clone()))
    }

    /// Concatenate the messages of everything reachable between the running
    /// parent and `commit`, normalize line endings to CRLF, and strip legacy
    /// trailers before transmission.
    fn build_message(
        &self,
        repo: &Repository,
        running_parent: Option<Oid>,
        commit: Oid,
    ) -> Result<String, SyncError> {
        let mut walk = repo.revwalk().map_err(GitError::Git)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
            .map_err(GitError::Git)?;
        walk.push(commit).map_err(GitError::Git)?;
        if let Some(parent) = running_parent {
            walk.hide(parent).map_err(GitError::Git)?;
        }

        let mut messages = Vec::new();
        for oid in walk {
            let oid = oid.map_err(GitError::Git)?;
            let c = repo.find_commit(oid).map_err(GitError::Git)?;
            let message = strip_legacy_trailers(c.message().unwrap_or_default());
            if !message.trim().is_empty() {
                messages.push(message);
            }
        }

        let joined = messages.join("\n\n");
        Ok(normalize_crlf(&joined))
    }

    fn cleanup_after_failure(&self, last_bound: Oid, failed: Oid) {
        tracing::warn!(
            %failed,
            %last_bound,
            "checkin failed mid-sequence; rebasing later commits onto the last bound commit"
        );
        let last = last_bound.to_string();
        let failed = failed.to_string();
        match run_git(
            self.ctx.repo_root(),
            &["rebase", "--rebase-merges", "--onto", &last, &failed],
        ) {
            Ok(output) if output.success() => {}
            Ok(output) => {
                tracing::warn!(stderr = %output.stderr.trim(), "cleanup rebase failed");
            }
            Err(err) => tracing::warn!(%err, "cleanup rebase could not run"),
        }
    }
}

/// First-parent path from `target` back to (but excluding) `exclude`,
/// oldest first.
pub fn first_parent_path(
    repo: &Repository,
    target: Oid,
    exclude: Option<Oid>,
) -> Result<Vec<Oid>, GitError> {
    let mut commits = Vec::new();
    let mut current = Some(target);
    while let Some(oid) = current {
        if Some(oid) == exclude {
            break;
        }
        commits.push(oid);
        current = repo.find_commit(oid)?.parent_ids().next();
    }
    commits.reverse();
    Ok(commits)
}

fn skip_precheckin_fetch(options: &CheckinOptions) -> bool {
    if options.skip_precheckin_fetch {
        return true;
    }
    std::env::var("GIT_TFS_SKIP_PRECHECKIN_FETCH")
        .map(|v| {
            let v = v.trim();
            !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

fn load_author_map(options: &CheckinOptions) -> Result<AuthorMap, SyncError> {
    match &options.authors_file {
        Some(path) => AuthorMap::load(path).map_err(|err| SyncError::PreconditionFailed {
            message: err.to_string(),
            recommendations: vec![format!(
                "Check that the authors file at {} exists and is readable.",
                path.display()
            )],
        }),
        None => Ok(AuthorMap::default()),
    }
}

/// Precedence: explicit option, authors-file map, identity derived from the
/// git author, authenticated caller. Merge-content checkins credit the last
/// merged parent: its identity replaces the merge commit's own before the
/// map and derivation steps run.
fn resolve_author(
    commit: &Commit<'_>,
    options: &CheckinOptions,
    map: &AuthorMap,
    merged_author: Option<&(String, String)>,
) -> String {
    if let Some(author) = &options.author {
        return author.clone();
    }

    let author = commit.author();
    let (name, email) = match merged_author {
        Some((name, email)) => (name.as_str(), email.as_str()),
        None => (
            author.name().unwrap_or_default(),
            author.email().unwrap_or_default(),
        ),
    };

    if let Some(mapped) = map.lookup(name, email) {
        return mapped.to_string();
    }

    derive_tfvc_author(name, email)
}

fn derive_tfvc_author(name: &str, email: &str) -> String {
    // A git name already in DOMAIN\user form is preserved as-is.
    if name.contains('\\') {
        return name.to_string();
    }
    if let Some((local, _)) = email.split_once('@')
        && !local.is_empty()
    {
        return local.to_string();
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn normalize_crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_normalization_is_idempotent() {
        let mixed = "subject\r\n\r\nbody line\nanother\n";
        let once = normalize_crlf(mixed);
        assert_eq!(once, "subject\r\n\r\nbody line\r\nanother\r\n");
        assert_eq!(normalize_crlf(&once), once);
    }

    #[test]
    fn derive_author_prefers_domain_form() {
        assert_eq!(derive_tfvc_author("CORP\\jdoe", "jane@example.com"), "CORP\\jdoe");
        assert_eq!(derive_tfvc_author("Jane Doe", "jane@example.com"), "jane");
    }
}

//! Sync orchestration.
//!
//! Implements the three sync modes over a typestate pipeline:
//! - `Locked → TfvcFetched` (fetch from TFVC)
//! - `TfvcFetched → Integrated` (fast-forward, else no-ff merge onto HEAD)
//! - `Locked | Integrated → GitPulled` (pull the git remote, merge never rebase)
//! - `GitPulled → CheckedIn` (replay unbound commits onto TFVC)
//! - `CheckedIn → done` (push commits, then the notes namespace)
//!
//! Each transition consumes `self` and checks for cancellation, so a run
//! cannot skip phases and always observes cancellation at a suspension
//! point. Merges are never rebases: rebasing would rewrite hashes and
//! invalidate bindings.

use std::path::PathBuf;
use std::time::Duration;

use git2::Oid;
use thiserror::Error;

use crate::checkin::{CheckinDriver, CheckinSummary};
use crate::context::Context;
use crate::error::{Effect, Transience};
use crate::git::error::GitError;
use crate::git::index::ChangesetIndex;
use crate::git::merge;
use crate::git::notes::{NOTES_REF, NOTES_REFSPEC, notes_refspec_configured};
use crate::git::process::run_git;
use crate::lock::{DEFAULT_MAX_LOCK_AGE, LockCoordinator, LockError, LockGuard, LockRecord};
use crate::remote::TfvcRemote;
use crate::tfvc::{CheckinOptions, TfvcClient, TfvcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDirection {
    FromTfvc,
    ToTfvc,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::FromTfvc => "tfvc-to-git",
            SyncDirection::ToTfvc => "git-to-tfvc",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn from_str(text: &str) -> Option<Self> {
        match text {
            "tfvc-to-git" => Some(SyncDirection::FromTfvc),
            "git-to-tfvc" => Some(SyncDirection::ToTfvc),
            "bidirectional" => Some(SyncDirection::Bidirectional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockOptions {
    pub timeout: Duration,
    pub max_lock_age: Duration,
    pub no_lock: bool,
    pub force_unlock: bool,
    pub lock_file: Option<PathBuf>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_lock_age: DEFAULT_MAX_LOCK_AGE,
            no_lock: false,
            force_unlock: false,
            lock_file: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    pub dry_run: bool,
    pub remote_id: String,
    pub lock: LockOptions,
    pub checkin: CheckinOptions,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub direction: SyncDirection,
    pub fetched_changesets: u64,
    pub checked_in: usize,
    pub last_changeset_id: Option<u64>,
    pub pushed: bool,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("{message}")]
    PreconditionFailed {
        message: String,
        recommendations: Vec<String>,
    },

    #[error("no TFVC remote configured with id `{id}`")]
    NoConfiguredRemote { id: String },

    #[error("nothing to check in")]
    NothingToCheckin,

    #[error("TFVC has new changesets (cached C{cached}, server C{server})")]
    RemoteAdvanced { cached: u64, server: u64 },

    #[error("merge stopped on conflicts")]
    MergeConflict { report: String, paths: Vec<String> },

    #[error("merged branch at {parent} has commits not checked into TFVC (merge commit {commit})")]
    UnmergedBranch { commit: Oid, parent: Oid },

    #[error(
        "binding write failed for {commit} after TFVC accepted changeset C{changeset_id}: {source}"
    )]
    BindingWriteFailed {
        commit: Oid,
        changeset_id: u64,
        #[source]
        source: Box<GitError>,
    },

    #[error("sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Tfvc(#[from] TfvcError),
}

impl SyncError {
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SyncError::PreconditionFailed { .. } | SyncError::NoConfiguredRemote { .. }
        )
    }

    pub fn transience(&self) -> Transience {
        match self {
            SyncError::RemoteAdvanced { .. } | SyncError::Cancelled => Transience::Retryable,
            SyncError::Git(e) => e.transience(),
            SyncError::Tfvc(e) => e.transience(),
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // The server changeset exists; only the local binding is missing.
            SyncError::BindingWriteFailed { .. } => Effect::Some,
            // The working tree is left in the conflicted state on purpose.
            SyncError::MergeConflict { .. } => Effect::Some,
            SyncError::NothingToCheckin
            | SyncError::PreconditionFailed { .. }
            | SyncError::NoConfiguredRemote { .. }
            | SyncError::RemoteAdvanced { .. }
            | SyncError::UnmergedBranch { .. } => Effect::None,
            SyncError::Cancelled => Effect::Unknown,
            SyncError::Git(e) => e.effect(),
            SyncError::Tfvc(e) => e.effect(),
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        match self {
            SyncError::PreconditionFailed {
                recommendations, ..
            } => recommendations.clone(),
            SyncError::NoConfiguredRemote { id } => vec![format!(
                "Run `tfsync init-workspace --remote {id} --tfs-url <url> --tfs-path <$/path>`."
            )],
            SyncError::RemoteAdvanced { .. } => vec![
                "Re-run with --auto-rebase to catch up automatically.".to_string(),
                "Or fetch and rebase your work onto the TFVC remote ref, then retry.".to_string(),
            ],
            SyncError::MergeConflict { .. } => vec![
                "Resolve the conflicted files, `git add` them, commit the merge.".to_string(),
                "Re-run `tfsync sync`; already-bound commits are skipped.".to_string(),
            ],
            SyncError::UnmergedBranch { parent, .. } => vec![
                format!("Check in the merged branch first (its tip is {parent})."),
                "Or pass --ignore-merge to check the merge in as plain content.".to_string(),
            ],
            SyncError::BindingWriteFailed { .. } => vec![
                format!("Verify {NOTES_REF} is writable in this repository."),
                "Run `tfsync repair-notes` to re-derive the missing binding.".to_string(),
            ],
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Phase markers
// =============================================================================

/// Lock held, preconditions checked.
pub struct Locked;

/// TFVC changesets fetched and bound.
pub struct TfvcFetched {
    fetched_changesets: u64,
}

/// TFVC remote-tracking ref integrated into HEAD.
pub struct Integrated {
    fetched_changesets: u64,
}

/// Git remote pulled (merge, never rebase).
pub struct GitPulled {
    fetched_changesets: u64,
}

/// Unbound commits replayed onto TFVC.
pub struct CheckedIn {
    fetched_changesets: u64,
    summary: CheckinSummary,
}

pub struct SyncRun<'a, Phase> {
    ctx: &'a mut Context,
    client: &'a mut dyn TfvcClient,
    options: &'a SyncOptions,
    remote: TfvcRemote,
    index: ChangesetIndex,
    phase: Phase,
}

impl<'a> SyncRun<'a, Locked> {
    fn new(
        ctx: &'a mut Context,
        client: &'a mut dyn TfvcClient,
        options: &'a SyncOptions,
        remote: TfvcRemote,
    ) -> Self {
        SyncRun {
            ctx,
            client,
            options,
            remote,
            index: ChangesetIndex::new(),
            phase: Locked,
        }
    }

    /// Fetch from TFVC. The client materializes new changesets as commits on
    /// the remote-tracking ref, binds each one, and advances the watermark.
    fn fetch_tfvc(mut self) -> Result<SyncRun<'a, TfvcFetched>, SyncError> {
        check_cancelled(self.ctx)?;
        let fetched = if self.options.dry_run {
            tracing::info!(remote = %self.remote.id, "dry-run: would fetch from TFVC");
            0
        } else {
            let summary = self.client.fetch(self.ctx, &mut self.remote)?;
            self.remote.save_watermark(self.ctx.repo())?;
            summary.new_changesets
        };
        Ok(self.transition(TfvcFetched {
            fetched_changesets: fetched,
        }))
    }

    fn pull_git(self) -> Result<SyncRun<'a, GitPulled>, SyncError> {
        let fetched = 0;
        pull_git_remote(self.ctx, self.options)?;
        let mut run = self.transition(GitPulled {
            fetched_changesets: fetched,
        });
        run.refresh_remote()?;
        Ok(run)
    }
}

impl<'a> SyncRun<'a, TfvcFetched> {
    /// Integrate the TFVC remote-tracking ref into HEAD: fast-forward when
    /// possible, otherwise a `--no-ff` merge commit created on HEAD so
    /// existing hashes survive as merge parents.
    fn integrate(self) -> Result<SyncRun<'a, Integrated>, SyncError> {
        check_cancelled(self.ctx)?;
        let fetched = self.phase.fetched_changesets;

        if self.options.dry_run {
            tracing::info!(r#ref = %self.remote.remote_ref, "dry-run: would integrate TFVC ref");
            return Ok(self.transition(Integrated {
                fetched_changesets: fetched,
            }));
        }

        if self.ctx.repo().refname_to_id(&self.remote.remote_ref).is_err() {
            tracing::debug!(r#ref = %self.remote.remote_ref, "no TFVC ref yet; nothing to integrate");
            return Ok(self.transition(Integrated {
                fetched_changesets: fetched,
            }));
        }

        let remote_ref = self.remote.remote_ref.clone();
        let ff = run_git(self.ctx.repo_root(), &["merge", "--ff-only", &remote_ref])?;
        if !ff.success() {
            let message = format!("Merge TFVC changesets from {}", self.remote.tfs_path);
            let no_ff = run_git(
                self.ctx.repo_root(),
                &["merge", "--no-ff", "-m", &message, &remote_ref],
            )?;
            if !no_ff.success() {
                self.ctx.rebind()?;
                return Err(conflict_or_command_error(
                    self.ctx,
                    "merge --no-ff",
                    no_ff.status,
                    &no_ff.stderr,
                )?);
            }
        }
        self.ctx.rebind()?;

        Ok(self.transition(Integrated {
            fetched_changesets: fetched,
        }))
    }

    fn finish_fetch_only(self) -> SyncSummary {
        SyncSummary {
            direction: self.options.direction,
            fetched_changesets: self.phase.fetched_changesets,
            checked_in: 0,
            last_changeset_id: None,
            pushed: false,
        }
    }
}

impl<'a> SyncRun<'a, Integrated> {
    fn pull_git(self) -> Result<SyncRun<'a, GitPulled>, SyncError> {
        let fetched = self.phase.fetched_changesets;
        pull_git_remote(self.ctx, self.options)?;
        let mut run = self.transition(GitPulled {
            fetched_changesets: fetched,
        });
        run.refresh_remote()?;
        Ok(run)
    }
}

impl<'a> SyncRun<'a, GitPulled> {
    /// Re-read remote state from storage; the pull may have advanced the
    /// remote-tracking ref and the watermark with it.
    fn refresh_remote(&mut self) -> Result<(), SyncError> {
        self.remote.reload(self.ctx.repo())?;
        Ok(())
    }

    fn checkin(self) -> Result<SyncRun<'a, CheckedIn>, SyncError> {
        check_cancelled(self.ctx)?;
        let fetched = self.phase.fetched_changesets;

        let mut checkin_options = self.options.checkin.clone();
        // The orchestrator just pulled; a second fetch would trigger a
        // redundant merge and could clobber the fresh bindings.
        checkin_options.skip_precheckin_fetch = true;
        checkin_options.dry_run = self.options.dry_run;

        let SyncRun {
            ctx,
            client,
            options,
            mut remote,
            mut index,
            ..
        } = self;

        let summary = {
            let mut driver = CheckinDriver::new(ctx, client, &mut index);
            match driver.checkin("HEAD", &mut remote, &checkin_options) {
                Ok(summary) => summary,
                Err(SyncError::NothingToCheckin) => {
                    tracing::info!("nothing to check in");
                    CheckinSummary::default()
                }
                Err(err) => return Err(err),
            }
        };

        Ok(SyncRun {
            ctx,
            client,
            options,
            remote,
            index,
            phase: CheckedIn {
                fetched_changesets: fetched,
                summary,
            },
        })
    }
}

impl<'a> SyncRun<'a, CheckedIn> {
    /// Push commits, then the metadata namespace. Plain push first; one
    /// retry with `--force-with-lease` when rejected. The notes ref is
    /// last-writer-wins by design: bindings are immutable, so any two valid
    /// writers agree.
    fn push(self) -> Result<SyncSummary, SyncError> {
        check_cancelled(self.ctx)?;
        let mut pushed = false;

        if self.options.dry_run {
            tracing::info!(remote = %self.ctx.git_remote, "dry-run: would push commits and notes");
        } else {
            let remote_name = self.ctx.git_remote.clone();
            push_with_lease_fallback(self.ctx, &remote_name, None)?;
            push_with_lease_fallback(self.ctx, &remote_name, Some(NOTES_REFSPEC))?;
            pushed = true;
        }

        Ok(SyncSummary {
            direction: self.options.direction,
            fetched_changesets: self.phase.fetched_changesets,
            checked_in: self.phase.summary.checked_in.len(),
            last_changeset_id: self.phase.summary.last_changeset_id(),
            pushed,
        })
    }
}

impl<'a, Phase> SyncRun<'a, Phase> {
    fn transition<Next>(self, next: Next) -> SyncRun<'a, Next> {
        SyncRun {
            ctx: self.ctx,
            client: self.client,
            options: self.options,
            remote: self.remote,
            index: self.index,
            phase: next,
        }
    }
}

// =============================================================================
// Entry point
// =============================================================================

/// Run one sync in the configured direction, gated by the workspace lock and
/// the notes-namespace precondition.
pub fn run(
    ctx: &mut Context,
    client: &mut dyn TfvcClient,
    options: &SyncOptions,
) -> crate::Result<SyncSummary> {
    ensure_namespace_enabled(ctx)?;

    let remote_id = if options.remote_id.is_empty() {
        crate::remote::DEFAULT_REMOTE_ID
    } else {
        &options.remote_id
    };
    let remote = TfvcRemote::load(ctx.repo(), remote_id)
        .map_err(SyncError::Git)?
        .ok_or_else(|| SyncError::NoConfiguredRemote {
            id: remote_id.to_string(),
        })?;

    let _guard = acquire_lock(ctx, options)?;

    let summary = run_locked(ctx, client, options, remote)?;
    tracing::info!(
        direction = summary.direction.as_str(),
        fetched = summary.fetched_changesets,
        checked_in = summary.checked_in,
        "sync complete"
    );
    Ok(summary)
}

fn run_locked(
    ctx: &mut Context,
    client: &mut dyn TfvcClient,
    options: &SyncOptions,
    remote: TfvcRemote,
) -> Result<SyncSummary, SyncError> {
    let run = SyncRun::new(ctx, client, options, remote);
    match options.direction {
        SyncDirection::FromTfvc => Ok(run.fetch_tfvc()?.finish_fetch_only()),
        SyncDirection::ToTfvc => run.pull_git()?.checkin()?.push(),
        SyncDirection::Bidirectional => run
            .fetch_tfvc()?
            .integrate()?
            .pull_git()?
            .checkin()?
            .push(),
    }
}

fn acquire_lock(ctx: &Context, options: &SyncOptions) -> Result<Option<LockGuard>, LockError> {
    if options.lock.no_lock {
        tracing::warn!("running without the workspace lock");
        return Ok(None);
    }

    let coordinator = LockCoordinator::new(ctx.repo_root())
        .with_max_lock_age(options.lock.max_lock_age)
        .with_lock_file(options.lock.lock_file.clone());
    let name = ctx.workspace_name.clone();

    if options.lock.force_unlock {
        coordinator.force_unlock(&name)?;
    }

    let record = LockRecord::capture(&name, "sync", options.direction);
    let guard = coordinator.try_acquire(&name, options.lock.timeout, record)?;
    Ok(Some(guard))
}

fn ensure_namespace_enabled(ctx: &Context) -> Result<(), SyncError> {
    if notes_refspec_configured(ctx.repo(), &ctx.git_remote)? {
        return Ok(());
    }
    Err(SyncError::PreconditionFailed {
        message: format!(
            "metadata namespace {NOTES_REF} is not configured for remote `{}`",
            ctx.git_remote
        ),
        recommendations: vec![
            "Run `tfsync init-workspace` to wire the notes refspecs.".to_string(),
        ],
    })
}

fn check_cancelled(ctx: &Context) -> Result<(), SyncError> {
    if ctx.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Pull the git remote with merge semantics. Rebase is never an option
/// here: it would rewrite bound hashes.
fn pull_git_remote(ctx: &mut Context, options: &SyncOptions) -> Result<(), SyncError> {
    check_cancelled(ctx)?;
    if options.dry_run {
        tracing::info!(remote = %ctx.git_remote, "dry-run: would pull git remote");
        return Ok(());
    }

    let remote_name = ctx.git_remote.clone();
    let output = run_git(ctx.repo_root(), &["pull", "--no-rebase", &remote_name])?;
    ctx.rebind()?;
    if !output.success() {
        return Err(conflict_or_command_error(
            ctx,
            "pull --no-rebase",
            output.status,
            &output.stderr,
        )?);
    }
    Ok(())
}

/// Distinguish a conflicted merge (halt with a report) from a plain command
/// failure. Returns the error to raise.
fn conflict_or_command_error(
    ctx: &Context,
    command: &str,
    status: i32,
    stderr: &str,
) -> Result<SyncError, SyncError> {
    if merge::has_conflicts(ctx.repo())? {
        let paths = merge::conflicted_paths(ctx.repo_root())?;
        let report_ctx = merge::ReportContext::from_env(Some(&ctx.workspace_name));
        let report = merge::build_report(&report_ctx, &paths);
        return Ok(SyncError::MergeConflict { report, paths });
    }
    Ok(SyncError::Git(GitError::Command {
        args: command.to_string(),
        status,
        stderr: stderr.trim().to_string(),
    }))
}

fn push_with_lease_fallback(
    ctx: &Context,
    remote_name: &str,
    refspec: Option<&str>,
) -> Result<(), SyncError> {
    let mut args = vec!["push", remote_name];
    if let Some(refspec) = refspec {
        args.push(refspec);
    }
    let output = run_git(ctx.repo_root(), &args)?;
    if output.success() {
        return Ok(());
    }

    tracing::warn!(
        remote = remote_name,
        refspec = refspec.unwrap_or("-"),
        "plain push rejected; retrying once with --force-with-lease"
    );
    let mut forced = vec!["push", "--force-with-lease", remote_name];
    if let Some(refspec) = refspec {
        forced.push(refspec);
    }
    let output = run_git(ctx.repo_root(), &forced)?;
    if !output.success() {
        return Err(SyncError::Git(GitError::Command {
            args: forced.join(" "),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_roundtrip() {
        for direction in [
            SyncDirection::FromTfvc,
            SyncDirection::ToTfvc,
            SyncDirection::Bidirectional,
        ] {
            assert_eq!(SyncDirection::from_str(direction.as_str()), Some(direction));
        }
        assert_eq!(SyncDirection::from_str("sideways"), None);
    }

    #[test]
    fn precondition_errors_map_to_exit_one() {
        let err = SyncError::PreconditionFailed {
            message: "namespace disabled".to_string(),
            recommendations: vec![],
        };
        assert!(err.is_precondition());
        assert!(SyncError::NoConfiguredRemote { id: "default".into() }.is_precondition());
        assert!(!SyncError::NothingToCheckin.is_precondition());
    }

    #[test]
    fn binding_write_failure_reports_side_effects() {
        let err = SyncError::BindingWriteFailed {
            commit: Oid::zero(),
            changeset_id: 9,
            source: Box::new(GitError::RefNotFound("refs/notes/tfvc-sync".into())),
        };
        assert_eq!(err.effect(), Effect::Some);
        assert!(
            err.recommendations()
                .iter()
                .any(|r| r.contains("repair-notes"))
        );
    }
}

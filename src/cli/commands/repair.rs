//! Administrative repair of the binding namespace.
//!
//! Two modes: scan history for legacy `git-tfs-id` trailers that never made
//! it into the notes namespace, or bind one explicit changeset/commit pair.
//! The latter is the recovery path for the crash window between a server
//! checkin and the local binding write.

use git2::Oid;

use crate::cli::{Ctx, RepairArgs};
use crate::context::Context;
use crate::git::index::parse_legacy_id;
use crate::git::notes::NotesStore;
use crate::remote::TfvcRemote;
use crate::sync::SyncError;
use crate::{Error, Result};

pub(crate) fn handle(ctx: &Ctx, args: RepairArgs) -> Result<()> {
    let context = Context::open(&ctx.workspace_root, &ctx.workspace_name)?;
    let repo = context.repo();
    let notes = NotesStore::new(repo);

    if let (Some(changeset), Some(commit)) = (args.changeset, args.commit.as_deref()) {
        let oid = Oid::from_str(commit)
            .map_err(|e| Error::InvalidArguments(format!("invalid commit `{commit}`: {e}")))?;
        let remote = TfvcRemote::load(repo, &args.remote)
            .map_err(SyncError::Git)?
            .ok_or_else(|| SyncError::NoConfiguredRemote {
                id: args.remote.clone(),
            })?;
        notes
            .put(oid, &remote.tfs_url, &remote.tfs_path, changeset)
            .map_err(SyncError::Git)?;
        if !ctx.quiet {
            println!("bound C{changeset} to {oid}");
        }
        return Ok(());
    }

    let repaired = repair_from_trailers(&context)?;
    if !ctx.quiet {
        println!("repaired {repaired} binding(s) from legacy trailers");
    }
    Ok(())
}

/// Walk every ref and rewrite trailer-only metadata into the namespace.
fn repair_from_trailers(context: &Context) -> Result<usize> {
    let repo = context.repo();
    let notes = NotesStore::new(repo);

    let mut walk = repo.revwalk().map_err(|e| SyncError::Git(e.into()))?;
    walk.push_glob("refs/*")
        .map_err(|e| SyncError::Git(e.into()))?;

    let mut repaired = 0usize;
    for oid in walk {
        let oid = oid.map_err(|e| SyncError::Git(e.into()))?;
        if notes.get(oid).map_err(SyncError::Git)?.is_some() {
            continue;
        }
        let commit = repo.find_commit(oid).map_err(|e| SyncError::Git(e.into()))?;
        let Some(legacy) = commit.message().and_then(parse_legacy_id) else {
            continue;
        };
        notes
            .put(oid, &legacy.tfs_url, &legacy.tfs_path, legacy.changeset_id)
            .map_err(SyncError::Git)?;
        tracing::info!(commit = %oid, changeset = legacy.changeset_id, "binding repaired");
        repaired += 1;
    }
    Ok(repaired)
}

use std::fs;

use crate::cli::{Ctx, InitArgs};
use crate::context::Context;
use crate::git::notes::configure_remote_to_sync;
use crate::remote::TfvcRemote;
use crate::sync::SyncError;
use crate::{Error, Result};

pub(crate) fn handle(ctx: &Ctx, args: InitArgs) -> Result<()> {
    if !args.tfs_path.starts_with("$/") {
        return Err(Error::InvalidArguments(format!(
            "--tfs-path must start with `$/`, got `{}`",
            args.tfs_path
        )));
    }

    if !ctx.workspace_root.exists() {
        fs::create_dir_all(&ctx.workspace_root)
            .map_err(|e| Error::InvalidArguments(format!("cannot create workspace: {e}")))?;
    }

    let context = Context::open(&ctx.workspace_root, &ctx.workspace_name)?;

    let mut remote = TfvcRemote::new(&args.remote, &args.tfs_url, &args.tfs_path);
    remote.legacy_urls = args.legacy_url.clone();
    remote.save(context.repo()).map_err(SyncError::Git)?;

    match configure_remote_to_sync(context.repo(), &context.git_remote) {
        Ok(true) => tracing::info!(remote = %context.git_remote, "notes refspecs configured"),
        Ok(false) => tracing::debug!("notes refspecs already present"),
        Err(err) => {
            return Err(SyncError::PreconditionFailed {
                message: format!(
                    "could not wire notes refspecs on `{}`: {err}",
                    context.git_remote
                ),
                recommendations: vec![format!(
                    "Add a git remote named `{}` first (`git remote add ...`).",
                    context.git_remote
                )],
            }
            .into());
        }
    }

    copy_gitignore_seed(ctx);

    if !ctx.quiet {
        println!(
            "workspace `{}` initialized for {} {}",
            ctx.workspace_name, args.tfs_url, args.tfs_path
        );
    }
    Ok(())
}

/// A missing template is a warning, not an error.
fn copy_gitignore_seed(ctx: &Ctx) {
    let template = crate::paths::gitignore_template_path();
    let target = ctx.workspace_root.join(".gitignore");
    if target.exists() {
        return;
    }
    match fs::copy(&template, &target) {
        Ok(_) => tracing::info!(from = %template.display(), "gitignore seed copied"),
        Err(err) => tracing::warn!(
            template = %template.display(),
            %err,
            "no gitignore template; continuing without one"
        ),
    }
}

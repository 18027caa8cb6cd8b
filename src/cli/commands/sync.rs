use crate::cli::{Ctx, SyncArgs, lock_options_from, render};
use crate::context::Context;
use crate::sync::{self, SyncDirection, SyncOptions};
use crate::tfvc::{BridgeClient, CheckinOptions};
use crate::{Error, Result};

pub(crate) fn handle(ctx: &Ctx, args: SyncArgs) -> Result<()> {
    let direction = match (args.from_tfvc, args.to_tfvc) {
        (true, false) => SyncDirection::FromTfvc,
        (false, true) => SyncDirection::ToTfvc,
        (false, false) => SyncDirection::Bidirectional,
        // clap rejects this combination before we get here.
        (true, true) => {
            return Err(Error::InvalidArguments(
                "--from-tfvc and --to-tfvc are mutually exclusive".to_string(),
            ));
        }
    };

    let mut context = Context::open(&ctx.workspace_root, &ctx.workspace_name)?;

    let mut client = BridgeClient::from_env(context.repo_root()).ok_or_else(|| {
        Error::InvalidArguments(
            "no TFVC client configured; set TFSYNC_TFVC_CLIENT to the bridge executable"
                .to_string(),
        )
    })?;

    let options = SyncOptions {
        direction,
        dry_run: args.dry_run,
        remote_id: args.remote.clone(),
        lock: lock_options_from(&args),
        checkin: CheckinOptions {
            author: args.author.clone(),
            authors_file: args.authors_file.clone(),
            ignore_merge: args.ignore_merge,
            auto_rebase: args.auto_rebase,
            skip_precheckin_fetch: false,
            dry_run: args.dry_run,
        },
    };

    let summary = sync::run(&mut context, &mut client, &options)?;
    render::print_summary(&summary, ctx.json, ctx.quiet);
    Ok(())
}

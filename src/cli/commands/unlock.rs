use crate::Result;
use crate::cli::Ctx;
use crate::lock::LockCoordinator;

pub(crate) fn handle(ctx: &Ctx) -> Result<()> {
    let coordinator = LockCoordinator::new(&ctx.workspace_root);
    if let Some(record) = coordinator.get_info(&ctx.workspace_name)? {
        tracing::warn!(
            pid = record.pid,
            hostname = %record.hostname,
            "removing lock held by another process"
        );
    }
    coordinator.force_unlock(&ctx.workspace_name)?;
    if !ctx.quiet {
        println!("lock for workspace `{}` removed", ctx.workspace_name);
    }
    Ok(())
}

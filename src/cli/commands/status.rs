use time::format_description::well_known::Rfc3339;

use crate::Result;
use crate::cli::Ctx;
use crate::context::Context;
use crate::lock::{DEFAULT_MAX_LOCK_AGE, LockCoordinator, LockRecord};
use crate::remote::TfvcRemote;
use crate::sync::SyncError;

pub(crate) fn handle(ctx: &Ctx) -> Result<()> {
    let coordinator = LockCoordinator::new(&ctx.workspace_root);
    let record = coordinator.get_info(&ctx.workspace_name)?;
    let lock_file_present = coordinator.lock_path(&ctx.workspace_name).exists();
    let stale = if lock_file_present {
        coordinator.is_stale(&ctx.workspace_name, DEFAULT_MAX_LOCK_AGE)?
    } else {
        false
    };

    let context = Context::open(&ctx.workspace_root, &ctx.workspace_name)?;
    let remotes = TfvcRemote::load_all(context.repo()).map_err(SyncError::Git)?;

    if ctx.json {
        print_json(record.as_ref(), lock_file_present, stale, &remotes);
        return Ok(());
    }

    match &record {
        Some(record) => {
            let acquired = record
                .acquired_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| "?".to_string());
            println!(
                "lock: held by pid {} on {} since {} ({}){}",
                record.pid,
                record.hostname,
                acquired,
                record.direction.as_str(),
                if stale { " [stale]" } else { "" }
            );
            if !record.pipeline_id.is_empty() {
                println!(
                    "      pipeline {} build {}",
                    record.pipeline_id, record.build_number
                );
            }
        }
        None if lock_file_present => {
            println!(
                "lock: held (record unreadable){}",
                if stale { " [stale]" } else { "" }
            );
        }
        None => println!("lock: free"),
    }

    if remotes.is_empty() {
        println!("remotes: none configured");
        return Ok(());
    }
    for remote in &remotes {
        println!(
            "remote {}: {} {} at C{}{}",
            remote.id,
            remote.tfs_url,
            remote.tfs_path,
            remote.max_changeset_id,
            match remote.max_commit {
                Some(commit) => format!(" ({commit})"),
                None => String::new(),
            }
        );
    }

    Ok(())
}

fn print_json(record: Option<&LockRecord>, lock_file_present: bool, stale: bool, remotes: &[TfvcRemote]) {
    let lock = match record {
        Some(record) => serde_json::json!({
            "state": "held",
            "pid": record.pid,
            "hostname": record.hostname,
            "acquired_at": record.acquired_at.format(&Rfc3339).ok(),
            "acquired_by": record.acquired_by,
            "direction": record.direction.as_str(),
            "pipeline_id": record.pipeline_id,
            "build_number": record.build_number,
            "stale": stale,
        }),
        None if lock_file_present => serde_json::json!({
            "state": "unreadable",
            "stale": stale,
        }),
        None => serde_json::json!({ "state": "free" }),
    };

    let remotes: Vec<serde_json::Value> = remotes
        .iter()
        .map(|remote| {
            serde_json::json!({
                "id": remote.id,
                "tfs_url": remote.tfs_url,
                "tfs_path": remote.tfs_path,
                "max_changeset_id": remote.max_changeset_id,
                "max_commit": remote.max_commit.map(|c| c.to_string()),
            })
        })
        .collect();

    println!(
        "{}",
        serde_json::json!({ "lock": lock, "remotes": remotes })
    );
}

//! Output helpers.

use crate::Error;
use crate::sync::{SyncError, SyncSummary};

pub(crate) fn print_error(err: &Error) {
    eprintln!("error: {err}");

    // A halted merge gets its full report; everything else gets the short
    // remediation list.
    if let Error::Sync(SyncError::MergeConflict { report, .. }) = err {
        eprintln!("\n{report}");
    }

    let recommendations = err.recommendations();
    if !recommendations.is_empty() {
        eprintln!("\nRecommended solutions:");
        for recommendation in recommendations {
            eprintln!("  - {recommendation}");
        }
    }
}

pub(crate) fn print_summary(summary: &SyncSummary, json: bool, quiet: bool) {
    if json {
        let payload = serde_json::json!({
            "direction": summary.direction.as_str(),
            "fetched_changesets": summary.fetched_changesets,
            "checked_in": summary.checked_in,
            "last_changeset_id": summary.last_changeset_id,
            "pushed": summary.pushed,
        });
        println!("{payload}");
        return;
    }
    if quiet {
        return;
    }
    println!(
        "sync ({}) complete: {} changeset(s) fetched, {} commit(s) checked in{}",
        summary.direction.as_str(),
        summary.fetched_changesets,
        summary.checked_in,
        match summary.last_changeset_id {
            Some(id) => format!(" (through C{id})"),
            None => String::new(),
        }
    );
}

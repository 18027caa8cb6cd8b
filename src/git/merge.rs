//! Merge conflict arbitration.
//!
//! The arbiter never resolves anything. It inspects the index for unmerged
//! entries and produces operator guidance that depends on where the run is
//! happening: a CI agent cannot resolve interactively, and a multi-agent
//! workspace holds a lock other agents are waiting on.

use std::path::Path;

use git2::Repository;

use super::error::GitError;
use super::process::run_git_checked;

pub fn has_conflicts(repo: &Repository) -> Result<bool, GitError> {
    Ok(repo.index()?.has_conflicts())
}

/// Paths with unmerged entries, in git's own order.
pub fn conflicted_paths(repo_root: &Path) -> Result<Vec<String>, GitError> {
    let output = run_git_checked(repo_root, &["diff", "--name-only", "--diff-filter=U"])?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Where a conflict report is being rendered.
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub workspace_name: Option<String>,
    pub build_id: Option<String>,
    pub build_number: Option<String>,
    pub definition_name: Option<String>,
}

impl ReportContext {
    pub fn from_env(workspace_name: Option<&str>) -> Self {
        let non_empty = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        Self {
            workspace_name: workspace_name.map(str::to_string),
            build_id: non_empty("BUILD_BUILDID"),
            build_number: non_empty("BUILD_BUILDNUMBER"),
            definition_name: non_empty("BUILD_DEFINITIONNAME"),
        }
    }

    pub fn is_ci(&self) -> bool {
        self.build_id.is_some()
    }
}

/// Human-readable guidance for a halted merge. The working tree is left in
/// the conflicted state; the next sync resumes safely behind the checkin
/// idempotency gate.
pub fn build_report(ctx: &ReportContext, paths: &[String]) -> String {
    let mut report = String::from("Merge stopped on conflicts.\n\nConflicted paths:\n");
    if paths.is_empty() {
        report.push_str("  (none reported; inspect `git status`)\n");
    } else {
        for path in paths {
            report.push_str("  ");
            report.push_str(path);
            report.push('\n');
        }
    }
    report.push('\n');

    if ctx.is_ci() {
        let build = ctx
            .build_number
            .as_deref()
            .or(ctx.build_id.as_deref())
            .unwrap_or("?");
        let definition = ctx.definition_name.as_deref().unwrap_or("this pipeline");
        report.push_str(&format!(
            "This run was detected as CI build {build} of {definition}. The agent \
             cannot resolve conflicts; resolve them in a clone of this workspace:\n"
        ));
    } else {
        report.push_str("Resolve the conflicts in this working tree:\n");
    }

    report.push_str(
        "  1. Edit the conflicted files and `git add` each one.\n\
         \x20 2. Commit the merge (`git commit`).\n\
         \x20 3. Re-run `tfsync sync`; commits already checked in are skipped.\n",
    );

    if let Some(workspace) = &ctx.workspace_name {
        report.push_str(&format!(
            "\nWorkspace `{workspace}` stays locked until this process exits; other \
             agents will queue behind it.\n"
        ));
    }

    report
}

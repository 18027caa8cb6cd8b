//! Subprocess plumbing for working-tree git operations.

use std::path::Path;
use std::process::Command;

use super::error::GitError;

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run `git <args>` in `repo_root`, capturing output. A non-zero exit is
/// returned in [`GitOutput`], not as an error; use [`run_git_checked`] when
/// failure is fatal.
pub fn run_git(repo_root: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
    run_git_with_env(repo_root, args, &[])
}

pub fn run_git_with_env(
    repo_root: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> Result<GitOutput, GitError> {
    tracing::debug!(args = %args.join(" "), "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .envs(env.iter().copied())
        .output()
        .map_err(|source| GitError::Spawn {
            args: args.join(" "),
            source,
        })?;

    Ok(GitOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

pub fn run_git_checked(repo_root: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
    let output = run_git(repo_root, args)?;
    if !output.success() {
        return Err(GitError::Command {
            args: args.join(" "),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

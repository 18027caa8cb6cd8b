//! Per-run context.
//!
//! Every component of a sync run (checkin driver, ancestor walker, changeset
//! index) must agree on one repository handle. The context owns that handle
//! for the duration of the run and is re-bound between major phases when the
//! repository has been mutated externally (e.g. after `git pull`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use git2::Repository;

use crate::git::error::GitError;

pub struct Context {
    repo: Repository,
    repo_root: PathBuf,
    pub workspace_name: String,
    /// Git remote carrying commits and the notes namespace.
    pub git_remote: String,
    cancel: Arc<AtomicBool>,
}

impl Context {
    pub fn open(workspace_root: &Path, workspace_name: &str) -> Result<Self, GitError> {
        let repo = Repository::discover(workspace_root)
            .map_err(|e| GitError::OpenRepo(workspace_root.to_path_buf(), e))?;
        let repo_root = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .to_path_buf();
        Ok(Self {
            repo,
            repo_root,
            workspace_name: workspace_name.to_string(),
            git_remote: "origin".to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Re-open the repository handle after an external mutation so cached
    /// refs and config reflect what is on disk.
    pub fn rebind(&mut self) -> Result<(), GitError> {
        self.repo = Repository::open(&self.repo_root)
            .map_err(|e| GitError::OpenRepo(self.repo_root.clone(), e))?;
        Ok(())
    }

    /// Shared flag observed at phase transitions.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

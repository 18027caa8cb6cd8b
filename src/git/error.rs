//! Git adapter error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::{Effect, Transience};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GitError {
    #[error("failed to open repository at {0}: {1}")]
    OpenRepo(PathBuf, #[source] git2::Error),

    #[error("failed to spawn `git {args}`: {source}")]
    Spawn {
        args: String,
        #[source]
        source: io::Error,
    },

    #[error("`git {args}` exited with status {status}: {stderr}")]
    Command {
        args: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to write binding for {commit}: {source}")]
    BindingWrite {
        commit: git2::Oid,
        #[source]
        source: git2::Error,
    },

    #[error("reference not found: {0}")]
    RefNotFound(String),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl GitError {
    pub fn transience(&self) -> Transience {
        match self {
            // Subprocess failures cover network pushes/pulls; a retry may
            // succeed once the remote side settles.
            GitError::Command { .. } => Transience::Unknown,
            GitError::Spawn { .. }
            | GitError::OpenRepo(_, _)
            | GitError::RefNotFound(_)
            | GitError::BindingWrite { .. } => Transience::Permanent,
            GitError::Git(_) => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            GitError::Command { .. } | GitError::Git(_) | GitError::BindingWrite { .. } => {
                Effect::Unknown
            }
            _ => Effect::None,
        }
    }
}

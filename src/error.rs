use thiserror::Error;

use crate::git::error::GitError;
use crate::lock::LockError;
use crate::sync::SyncError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or on the TFVC server).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over subsystem errors. The CLI
/// maps each variant to an exit code and renders its recommendations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("{0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::InvalidArguments(_) => Transience::Permanent,
            Error::Lock(e) => e.transience(),
            Error::Git(e) => e.transience(),
            Error::Sync(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::InvalidArguments(_) => Effect::None,
            Error::Lock(e) => e.effect(),
            Error::Git(e) => e.effect(),
            Error::Sync(e) => e.effect(),
        }
    }

    /// Exit code contract: 1 invalid arguments or failed preconditions,
    /// 2 exception, 3 lock not acquired.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArguments(_) => 1,
            Error::Lock(LockError::Timeout { .. }) => 3,
            Error::Lock(LockError::InvalidTimeout { .. }) => 1,
            Error::Lock(_) => 2,
            Error::Sync(e) if e.is_precondition() => 1,
            Error::Git(_) | Error::Sync(_) => 2,
        }
    }

    /// Ordered remediation steps for the operator, rendered by the CLI
    /// under "Recommended solutions:".
    pub fn recommendations(&self) -> Vec<String> {
        match self {
            Error::InvalidArguments(_) => Vec::new(),
            Error::Lock(e) => e.recommendations(),
            Error::Git(_) => Vec::new(),
            Error::Sync(e) => e.recommendations(),
        }
    }
}

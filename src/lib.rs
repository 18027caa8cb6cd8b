#![forbid(unsafe_code)]

pub mod checkin;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod lock;
mod paths;
pub mod remote;
pub mod sync;
pub mod telemetry;
pub mod tfvc;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types most callers touch.
pub use crate::context::Context;
pub use crate::git::notes::{ChangesetBinding, NotesStore, NOTES_REF};
pub use crate::lock::{LockCoordinator, LockRecord};
pub use crate::remote::{RemoteMatch, TfvcRemote};
pub use crate::sync::{SyncDirection, SyncOptions};
pub use crate::tfvc::{CheckinOptions, TfvcClient};

//! Workspace lock handling.
//!
//! Serializes sync runs across agents that share a workspace name. The lock
//! is a file created with `O_EXCL` semantics; the record inside is a
//! line-oriented `key=value` text so an operator can inspect who holds it.
//! Records older than `max_lock_age` are treated as abandoned and evicted by
//! the next acquirer.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{Effect, Transience};
use crate::paths;
use crate::sync::SyncDirection;

/// Poll cadence while the lock is contended.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default staleness threshold; also the upper bound for acquire timeouts.
pub const DEFAULT_MAX_LOCK_AGE: Duration = Duration::from_secs(7200);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRecord {
    pub workspace: String,
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: OffsetDateTime,
    pub acquired_by: String,
    pub pipeline_id: String,
    pub build_number: String,
    pub direction: SyncDirection,
}

impl LockRecord {
    /// Record for the current process, capturing CI identifiers when present.
    pub fn capture(workspace: &str, acquired_by: &str, direction: SyncDirection) -> Self {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            workspace: workspace.to_string(),
            pid: std::process::id(),
            hostname,
            acquired_at: OffsetDateTime::now_utc(),
            acquired_by: acquired_by.to_string(),
            pipeline_id: std::env::var("BUILD_BUILDID").unwrap_or_default(),
            build_number: std::env::var("BUILD_BUILDNUMBER").unwrap_or_default(),
            direction,
        }
    }

    pub fn to_text(&self) -> String {
        let acquired_at = self
            .acquired_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::new());
        format!(
            "workspace={}\npid={}\nhostname={}\nacquired_at={}\nacquired_by={}\npipeline_id={}\nbuild_number={}\ndirection={}\n",
            self.workspace,
            self.pid,
            self.hostname,
            acquired_at,
            self.acquired_by,
            self.pipeline_id,
            self.build_number,
            self.direction.as_str(),
        )
    }

    /// Parse a record. Unknown keys are ignored; a record without a parsable
    /// `acquired_at` is unreadable (the caller falls back to file mtime for
    /// staleness).
    pub fn parse(text: &str) -> Option<Self> {
        let mut workspace = String::new();
        let mut pid = 0u32;
        let mut hostname = String::new();
        let mut acquired_at = None;
        let mut acquired_by = String::new();
        let mut pipeline_id = String::new();
        let mut build_number = String::new();
        let mut direction = SyncDirection::Bidirectional;

        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "workspace" => workspace = value.to_string(),
                "pid" => pid = value.trim().parse().unwrap_or(0),
                "hostname" => hostname = value.to_string(),
                "acquired_at" => {
                    acquired_at = OffsetDateTime::parse(value.trim(), &Rfc3339).ok();
                }
                "acquired_by" => acquired_by = value.to_string(),
                "pipeline_id" => pipeline_id = value.to_string(),
                "build_number" => build_number = value.to_string(),
                "direction" => {
                    if let Some(parsed) = SyncDirection::from_str(value.trim()) {
                        direction = parsed;
                    }
                }
                _ => {}
            }
        }

        Some(Self {
            workspace,
            pid,
            hostname,
            acquired_at: acquired_at?,
            acquired_by,
            pipeline_id,
            build_number,
            direction,
        })
    }

    pub fn age(&self, now: OffsetDateTime) -> Duration {
        let delta = now - self.acquired_at;
        delta.try_into().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock timeout {timeout:?} exceeds max lock age {max_lock_age:?}")]
    InvalidTimeout {
        timeout: Duration,
        max_lock_age: Duration,
    },

    #[error("could not acquire lock `{name}` within {waited:?}")]
    Timeout {
        name: String,
        waited: Duration,
        holder: Option<Box<LockRecord>>,
    },

    #[error("lock path is a symlink: {path:?}")]
    Symlink { path: PathBuf },

    #[error("lock storage unavailable at {path:?}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    pub fn transience(&self) -> Transience {
        match self {
            LockError::Timeout { .. } => Transience::Retryable,
            LockError::InvalidTimeout { .. }
            | LockError::Symlink { .. }
            | LockError::StorageUnavailable { .. } => Transience::Permanent,
            LockError::Io(_) => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }

    pub fn recommendations(&self) -> Vec<String> {
        match self {
            LockError::Timeout { name, holder, .. } => {
                let mut out = vec![
                    "Wait for the other sync run to finish, then retry.".to_string(),
                    format!("Inspect the holder with `tfsync status --workspace-name {name}`."),
                ];
                if let Some(holder) = holder {
                    out.push(format!(
                        "If pid {} on {} is gone, run `tfsync force-unlock --workspace-name {name}`.",
                        holder.pid, holder.hostname
                    ));
                } else {
                    out.push(format!(
                        "If no sync run is active, run `tfsync force-unlock --workspace-name {name}`."
                    ));
                }
                out
            }
            LockError::InvalidTimeout { .. } => {
                vec!["Lower --lock-timeout or raise --max-lock-age.".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// Cross-process mutual exclusion over a named workspace.
pub struct LockCoordinator {
    root: PathBuf,
    max_lock_age: Duration,
    lock_file: Option<PathBuf>,
}

impl LockCoordinator {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            root: workspace_root.into(),
            max_lock_age: DEFAULT_MAX_LOCK_AGE,
            lock_file: None,
        }
    }

    pub fn with_max_lock_age(mut self, max_lock_age: Duration) -> Self {
        self.max_lock_age = max_lock_age;
        self
    }

    /// Explicit lock file path, overriding `<root>/<name>.lock`.
    pub fn with_lock_file(mut self, path: Option<PathBuf>) -> Self {
        self.lock_file = path;
        self
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(|| paths::lock_path(&self.root, name))
    }

    /// Poll at [`POLL_INTERVAL`] until `timeout` elapses. Evicts records
    /// older than `max_lock_age`. Two concurrent callers cannot both succeed:
    /// the create is `O_EXCL`.
    pub fn try_acquire(
        &self,
        name: &str,
        timeout: Duration,
        record: LockRecord,
    ) -> Result<LockGuard, LockError> {
        if timeout > self.max_lock_age || timeout > DEFAULT_MAX_LOCK_AGE {
            return Err(LockError::InvalidTimeout {
                timeout,
                max_lock_age: self.max_lock_age.min(DEFAULT_MAX_LOCK_AGE),
            });
        }

        let path = self.lock_path(name);
        reject_symlink(&path)?;

        let start = Instant::now();
        loop {
            match open_new_lock_file(&path) {
                Ok(mut file) => {
                    file.write_all(record.to_text().as_bytes())?;
                    file.sync_all()?;
                    tracing::debug!(lock = %path.display(), "lock acquired");
                    return Ok(LockGuard {
                        path,
                        released: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if self.is_stale_at(&path)? {
                        tracing::warn!(lock = %path.display(), "evicting stale lock");
                        remove_if_present(&path)?;
                        continue;
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                    ) =>
                {
                    return Err(LockError::StorageUnavailable { path, source: err });
                }
                Err(err) => return Err(LockError::Io(err)),
            }

            let waited = start.elapsed();
            if waited >= timeout {
                let holder = read_record(&path).ok().flatten().map(Box::new);
                return Err(LockError::Timeout {
                    name: name.to_string(),
                    waited,
                    holder,
                });
            }
            let remaining = timeout - waited;
            std::thread::sleep(POLL_INTERVAL.min(remaining));
        }
    }

    /// Remove the record; silent no-op if absent.
    pub fn release(&self, name: &str) -> Result<(), LockError> {
        remove_if_present(&self.lock_path(name))
    }

    /// Remove the record regardless of owner.
    pub fn force_unlock(&self, name: &str) -> Result<(), LockError> {
        let path = self.lock_path(name);
        tracing::info!(lock = %path.display(), "force unlock");
        remove_if_present(&path)
    }

    pub fn is_stale(&self, name: &str, max_age: Duration) -> Result<bool, LockError> {
        stale_at(&self.lock_path(name), max_age)
    }

    fn is_stale_at(&self, path: &Path) -> Result<bool, LockError> {
        stale_at(path, self.max_lock_age)
    }

    /// Read the holder record; `None` when absent or unreadable.
    pub fn get_info(&self, name: &str) -> Result<Option<LockRecord>, LockError> {
        read_record(&self.lock_path(name))
    }
}

/// Held lock. Dropping releases; `release()` surfaces the unlink error.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), LockError> {
        if !self.released {
            fs::remove_file(&self.path)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn stale_at(path: &Path, max_age: Duration) -> Result<bool, LockError> {
    match read_record(path)? {
        Some(record) => Ok(record.age(OffsetDateTime::now_utc()) > max_age),
        None => match fs::symlink_metadata(path) {
            // Unreadable record: fall back to the file's mtime so a
            // corrupted lock still becomes evictable.
            Ok(meta) => {
                let modified = meta.modified()?;
                let age = modified.elapsed().unwrap_or(Duration::ZERO);
                Ok(age > max_age)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(LockError::Io(err)),
        },
    }
}

fn read_record(path: &Path) -> Result<Option<LockRecord>, LockError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(LockError::Symlink {
            path: path.to_path_buf(),
        }),
        Ok(_) => {
            let text = fs::read_to_string(path)?;
            Ok(LockRecord::parse(&text))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(LockError::Io(err)),
    }
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LockError::Io(err)),
    }
}

fn reject_symlink(path: &Path) -> Result<(), LockError> {
    if let Ok(meta) = fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
    {
        return Err(LockError::Symlink {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn open_new_lock_file(path: &Path) -> io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true).mode(0o600);
        options.open(path)
    }
    #[cfg(not(unix))]
    {
        fs::OpenOptions::new().write(true).create_new(true).open(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> LockRecord {
        LockRecord {
            workspace: "ws".to_string(),
            pid: 4242,
            hostname: "agent-1".to_string(),
            acquired_at: OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap(),
            acquired_by: "sync".to_string(),
            pipeline_id: "991".to_string(),
            build_number: "20260801.3".to_string(),
            direction: SyncDirection::Bidirectional,
        }
    }

    #[test]
    fn record_text_roundtrip() {
        let record = sample_record();
        let parsed = LockRecord::parse(&record.to_text()).expect("parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn record_parse_ignores_unknown_keys() {
        let mut text = sample_record().to_text();
        text.push_str("future_key=whatever\n");
        let parsed = LockRecord::parse(&text).expect("parse");
        assert_eq!(parsed.pid, 4242);
    }

    #[test]
    fn record_without_timestamp_is_unreadable() {
        assert!(LockRecord::parse("workspace=ws\npid=1\n").is_none());
    }

    #[test]
    fn timeout_above_max_age_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator =
            LockCoordinator::new(dir.path()).with_max_lock_age(Duration::from_secs(60));
        let err = coordinator
            .try_acquire("ws", Duration::from_secs(120), sample_record())
            .expect_err("must reject");
        assert!(matches!(err, LockError::InvalidTimeout { .. }));
    }

    #[test]
    fn release_is_noop_when_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = LockCoordinator::new(dir.path());
        coordinator.release("ws").expect("noop");
    }

    #[test]
    fn guard_drop_removes_lock_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = LockCoordinator::new(dir.path());
        let path = coordinator.lock_path("ws");
        {
            let _guard = coordinator
                .try_acquire("ws", Duration::from_secs(1), sample_record())
                .expect("acquire");
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_record_detected_by_age() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = LockCoordinator::new(dir.path());
        let mut record = sample_record();
        record.acquired_at = OffsetDateTime::now_utc() - time::Duration::hours(3);
        fs::write(coordinator.lock_path("ws"), record.to_text()).expect("write");

        assert!(coordinator
            .is_stale("ws", Duration::from_secs(7200))
            .expect("is_stale"));
        assert!(!coordinator
            .is_stale("ws", Duration::from_secs(4 * 3600))
            .expect("is_stale"));
    }
}

//! Opaque surface of the TFVC client.
//!
//! The engine consumes TFVC as an RPC boundary: fetch changesets into git,
//! report the server-side high-watermark, check a commit in. Everything
//! behind this trait (web services, workspaces, pending changes) is another
//! component's problem.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::Oid;
use thiserror::Error;

use crate::context::Context;
use crate::error::{Effect, Transience};
use crate::git::notes::ChangesetBinding;
use crate::remote::TfvcRemote;

pub trait TfvcClient {
    /// Fetch changesets above the remote's watermark, materializing each as
    /// a commit on the remote-tracking ref with its binding written to the
    /// notes store, and advance the watermark.
    fn fetch(&mut self, ctx: &Context, remote: &mut TfvcRemote) -> Result<FetchSummary, TfvcError>;

    /// Highest changeset id on the server for the remote's repository path.
    fn max_changeset_id(&mut self, remote: &TfvcRemote) -> Result<u64, TfvcError>;

    /// Replay one commit onto TFVC. Returns the changeset id the server
    /// assigned. Idempotent at the granularity of a single call attempt.
    fn checkin(&mut self, request: &CheckinRequest<'_>) -> Result<u64, TfvcError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchSummary {
    pub new_changesets: u64,
}

/// One commit offered to the server.
#[derive(Debug)]
pub struct CheckinRequest<'a> {
    pub commit: Oid,
    pub parent_commit: Oid,
    pub parent_binding: Option<&'a ChangesetBinding>,
    pub message: String,
    pub author: String,
    /// Server path of the branch merged into this commit, when the commit
    /// should materialize as a TFVC merge.
    pub merged_branch_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckinOptions {
    /// Explicit author override; wins over the authors file.
    pub author: Option<String>,
    pub authors_file: Option<PathBuf>,
    /// Check merge commits in as plain content instead of failing when the
    /// merged branch has no binding.
    pub ignore_merge: bool,
    /// Catch up with rebase-with-merges when the server advanced, instead
    /// of failing.
    pub auto_rebase: bool,
    pub skip_precheckin_fetch: bool,
    pub dry_run: bool,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TfvcError {
    #[error("checkin of {commit} rejected by TFVC: {reason}")]
    CheckinRejected { commit: Oid, reason: String },

    #[error("TFVC rpc failed: {0}")]
    Rpc(String),
}

impl TfvcError {
    pub fn transience(&self) -> Transience {
        match self {
            TfvcError::CheckinRejected { .. } => Transience::Permanent,
            TfvcError::Rpc(_) => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            TfvcError::CheckinRejected { .. } => Effect::None,
            TfvcError::Rpc(_) => Effect::Unknown,
        }
    }
}

/// Map from git identity to TFVC account, loaded from an authors file.
///
/// One mapping per line, `Name <email> = DOMAIN\account`; `#` starts a
/// comment. Lookup tries the full `Name <email>` identity first, then the
/// bare email.
#[derive(Debug, Default, Clone)]
pub struct AuthorMap {
    by_identity: HashMap<String, String>,
    by_email: HashMap<String, String>,
}

impl AuthorMap {
    pub fn load(path: &Path) -> Result<Self, TfvcError> {
        let text = fs::read_to_string(path)
            .map_err(|e| TfvcError::Rpc(format!("failed to read authors file {path:?}: {e}")))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut map = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((identity, account)) = line.split_once('=') else {
                continue;
            };
            let identity = identity.trim().to_string();
            let account = account.trim().to_string();
            if let (Some(start), Some(end)) = (identity.find('<'), identity.rfind('>'))
                && start < end
            {
                map.by_email
                    .insert(identity[start + 1..end].to_string(), account.clone());
            }
            map.by_identity.insert(identity, account);
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    pub fn lookup(&self, name: &str, email: &str) -> Option<&str> {
        let identity = format!("{name} <{email}>");
        self.by_identity
            .get(&identity)
            .or_else(|| self.by_email.get(email))
            .map(String::as_str)
    }
}

/// TFVC client adapter driving an external bridge executable.
///
/// The engine treats TFVC as an opaque RPC surface. This adapter forwards
/// each operation to the executable named by `TFSYNC_TFVC_CLIENT`, passing
/// arguments on the command line and reading `key=value` lines from its
/// stdout. The bridge owns the server conversation; on fetch it materializes
/// commits on the remote-tracking ref, writes their bindings, and advances
/// the watermark in git config before returning.
pub struct BridgeClient {
    program: PathBuf,
    repo_root: PathBuf,
}

impl BridgeClient {
    pub fn new(program: impl Into<PathBuf>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            repo_root: repo_root.into(),
        }
    }

    pub fn from_env(repo_root: &Path) -> Option<Self> {
        let program = std::env::var("TFSYNC_TFVC_CLIENT").ok()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self::new(program, repo_root))
    }

    fn invoke(
        &self,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<HashMap<String, String>, TfvcError> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        tracing::debug!(bridge = %self.program.display(), args = %args.join(" "), "tfvc bridge");
        let mut child = Command::new(&self.program)
            .args(args)
            .current_dir(&self.repo_root)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TfvcError::Rpc(format!("failed to spawn TFVC bridge: {e}")))?;

        if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(text.as_bytes())
                .map_err(|e| TfvcError::Rpc(format!("failed to write to TFVC bridge: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TfvcError::Rpc(format!("TFVC bridge did not exit cleanly: {e}")))?;
        if !output.status.success() {
            return Err(TfvcError::Rpc(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut values = HashMap::new();
        for line in stdout.lines() {
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Ok(values)
    }
}

impl TfvcClient for BridgeClient {
    fn fetch(&mut self, ctx: &Context, remote: &mut TfvcRemote) -> Result<FetchSummary, TfvcError> {
        let values = self.invoke(
            &[
                "fetch",
                "--remote",
                &remote.id,
                "--tfs-url",
                &remote.tfs_url,
                "--tfs-path",
                &remote.tfs_path,
            ],
            None,
        )?;
        // The bridge advanced the watermark in git config.
        remote
            .reload(ctx.repo())
            .map_err(|e| TfvcError::Rpc(format!("failed to reload remote after fetch: {e}")))?;
        let new_changesets = values
            .get("new_changesets")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(FetchSummary { new_changesets })
    }

    fn max_changeset_id(&mut self, remote: &TfvcRemote) -> Result<u64, TfvcError> {
        let values = self.invoke(
            &[
                "max-changeset-id",
                "--tfs-url",
                &remote.tfs_url,
                "--tfs-path",
                &remote.tfs_path,
            ],
            None,
        )?;
        values
            .get("max_changeset_id")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| TfvcError::Rpc("bridge did not report max_changeset_id".to_string()))
    }

    fn checkin(&mut self, request: &CheckinRequest<'_>) -> Result<u64, TfvcError> {
        let commit = request.commit.to_string();
        let parent = request.parent_commit.to_string();
        let parent_changeset = request
            .parent_binding
            .map(|b| b.changeset_id.to_string())
            .unwrap_or_default();
        let mut args: Vec<&str> = vec![
            "checkin",
            "--commit",
            commit.as_str(),
            "--parent",
            parent.as_str(),
            "--author",
            request.author.as_str(),
        ];
        if !parent_changeset.is_empty() {
            args.push("--parent-changeset");
            args.push(&parent_changeset);
        }
        if let Some(path) = &request.merged_branch_path {
            args.push("--merged-branch-path");
            args.push(path);
        }

        let values = match self.invoke(&args, Some(&request.message)) {
            Ok(values) => values,
            Err(TfvcError::Rpc(reason)) => {
                return Err(TfvcError::CheckinRejected {
                    commit: request.commit,
                    reason,
                });
            }
            Err(err) => return Err(err),
        };
        values
            .get("changeset")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| TfvcError::Rpc("bridge did not report a changeset id".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_map_parses_identities_and_emails() {
        let map = AuthorMap::parse(
            "# build accounts\nJane Doe <jane@example.com> = CORP\\jdoe\nOps Bot <ops@example.com> = CORP\\opsbot\n",
        );
        assert_eq!(map.lookup("Jane Doe", "jane@example.com"), Some("CORP\\jdoe"));
        // Email match survives a renamed git identity.
        assert_eq!(map.lookup("J. Doe", "jane@example.com"), Some("CORP\\jdoe"));
        assert_eq!(map.lookup("Nobody", "no@example.com"), None);
    }

    #[test]
    fn author_map_skips_malformed_lines() {
        let map = AuthorMap::parse("not a mapping\n\n# comment\n");
        assert!(map.is_empty());
    }
}

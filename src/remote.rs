//! Remote descriptors and binding-to-remote resolution.
//!
//! A descriptor ties a TFVC collection URL and server path to a local
//! remote-tracking ref, and caches the watermark: the highest changeset id
//! bound to a commit reachable from that ref. Descriptors persist in git
//! config under `tfs-remote.<id>.*`.

use git2::{Oid, Repository};

use crate::git::error::GitError;

/// Default descriptor id used by init when none is given.
pub const DEFAULT_REMOTE_ID: &str = "default";

/// Descriptor id of the synthetic placeholder returned when resolution
/// fails entirely.
pub const DERIVED_REMOTE_ID: &str = "(derived)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfvcRemote {
    pub id: String,
    pub tfs_url: String,
    pub tfs_path: String,
    pub legacy_urls: Vec<String>,
    /// Remote-tracking ref the fetched changesets land on.
    pub remote_ref: String,
    pub max_changeset_id: u64,
    pub max_commit: Option<Oid>,
}

impl TfvcRemote {
    pub fn new(id: &str, tfs_url: &str, tfs_path: &str) -> Self {
        Self {
            id: id.to_string(),
            tfs_url: tfs_url.to_string(),
            tfs_path: tfs_path.to_string(),
            legacy_urls: Vec::new(),
            remote_ref: default_remote_ref(id),
            max_changeset_id: 0,
            max_commit: None,
        }
    }

    /// Read-only placeholder carrying unresolved metadata so the caller can
    /// report a meaningful error.
    pub fn derived(tfs_url: &str, tfs_path: &str) -> Self {
        Self {
            id: DERIVED_REMOTE_ID.to_string(),
            tfs_url: tfs_url.to_string(),
            tfs_path: tfs_path.to_string(),
            legacy_urls: Vec::new(),
            remote_ref: String::new(),
            max_changeset_id: 0,
            max_commit: None,
        }
    }

    pub fn is_derived(&self) -> bool {
        self.id == DERIVED_REMOTE_ID
    }

    /// Case-insensitive match against the current URL and any legacy URL.
    pub fn matches_url(&self, url: &str) -> bool {
        self.tfs_url.eq_ignore_ascii_case(url)
            || self
                .legacy_urls
                .iter()
                .any(|legacy| legacy.eq_ignore_ascii_case(url))
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.tfs_path.eq_ignore_ascii_case(path)
    }

    pub fn load(repo: &Repository, id: &str) -> Result<Option<Self>, GitError> {
        let config = repo.config()?.snapshot()?;
        let url = match config.get_string(&key(id, "url")) {
            Ok(url) => url,
            Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(GitError::Git(err)),
        };
        let tfs_path = config.get_string(&key(id, "repository")).unwrap_or_default();
        let legacy_urls = config
            .get_string(&key(id, "legacy-urls"))
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let remote_ref = config
            .get_string(&key(id, "remote-ref"))
            .unwrap_or_else(|_| default_remote_ref(id));
        let max_changeset_id = config
            .get_string(&key(id, "max-changeset-id"))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let max_commit = config
            .get_string(&key(id, "max-commit"))
            .ok()
            .and_then(|s| Oid::from_str(&s).ok());

        Ok(Some(Self {
            id: id.to_string(),
            tfs_url: url,
            tfs_path,
            legacy_urls,
            remote_ref,
            max_changeset_id,
            max_commit,
        }))
    }

    /// All configured descriptors, sorted by id.
    pub fn load_all(repo: &Repository) -> Result<Vec<Self>, GitError> {
        let config = repo.config()?.snapshot()?;
        let mut ids = Vec::new();
        let mut entries = config.entries(Some("tfs-remote\\..*"))?;
        while let Some(entry) = entries.next() {
            let entry = entry?;
            let Some(name) = entry.name() else { continue };
            let Some(rest) = name.strip_prefix("tfs-remote.") else {
                continue;
            };
            let Some(id) = rest.strip_suffix(".url") else {
                continue;
            };
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        ids.sort();

        let mut remotes = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(remote) = Self::load(repo, id)? {
                remotes.push(remote);
            }
        }
        Ok(remotes)
    }

    pub fn save(&self, repo: &Repository) -> Result<(), GitError> {
        let mut config = repo.config()?;
        config.set_str(&key(&self.id, "url"), &self.tfs_url)?;
        config.set_str(&key(&self.id, "repository"), &self.tfs_path)?;
        if self.legacy_urls.is_empty() {
            let _ = config.remove(&key(&self.id, "legacy-urls"));
        } else {
            config.set_str(&key(&self.id, "legacy-urls"), &self.legacy_urls.join(","))?;
        }
        config.set_str(&key(&self.id, "remote-ref"), &self.remote_ref)?;
        self.save_watermark(repo)?;
        Ok(())
    }

    /// Persist only the high-watermark pair.
    pub fn save_watermark(&self, repo: &Repository) -> Result<(), GitError> {
        let mut config = repo.config()?;
        config.set_str(
            &key(&self.id, "max-changeset-id"),
            &self.max_changeset_id.to_string(),
        )?;
        match self.max_commit {
            Some(commit) => {
                config.set_str(&key(&self.id, "max-commit"), &commit.to_string())?;
            }
            None => {
                let _ = config.remove(&key(&self.id, "max-commit"));
            }
        }
        Ok(())
    }

    /// Re-read this descriptor from config, keeping the in-memory value
    /// when the stored one disappeared.
    pub fn reload(&mut self, repo: &Repository) -> Result<(), GitError> {
        if let Some(fresh) = Self::load(repo, &self.id)? {
            *self = fresh;
        }
        Ok(())
    }

    /// Advance the watermark pair. Watermarks only move forward.
    pub fn advance_watermark(&mut self, commit: Oid, changeset_id: u64) {
        if changeset_id >= self.max_changeset_id {
            self.max_changeset_id = changeset_id;
            self.max_commit = Some(commit);
        }
    }

    pub fn remove(repo: &Repository, id: &str) -> Result<(), GitError> {
        let mut config = repo.config()?;
        for suffix in [
            "url",
            "repository",
            "legacy-urls",
            "remote-ref",
            "max-changeset-id",
            "max-commit",
        ] {
            let _ = config.remove(&key(id, suffix));
        }
        Ok(())
    }
}

fn key(id: &str, suffix: &str) -> String {
    format!("tfs-remote.{id}.{suffix}")
}

fn default_remote_ref(id: &str) -> String {
    format!("refs/remotes/tfs/{id}")
}

/// How a binding was matched to a configured remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMatch {
    /// URL (current or legacy) and path both matched.
    Exact,
    /// Only the repository path matched; the URL has drifted.
    PathOnly,
    /// Nothing matched but a single remote is configured.
    SoleRemote,
    /// Nothing matched at all; the result is a read-only placeholder.
    Derived,
}

/// Map a `(tfs_url, tfs_path)` pair recovered from a binding to one
/// configured remote. Candidates are ordered by id so resolution is
/// reproducible when several remotes match.
pub fn resolve_remote(
    remotes: &[TfvcRemote],
    tfs_url: &str,
    tfs_path: &str,
) -> (TfvcRemote, RemoteMatch) {
    let mut sorted: Vec<&TfvcRemote> = remotes.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let exact: Vec<&TfvcRemote> = sorted
        .iter()
        .copied()
        .filter(|r| r.matches_url(tfs_url) && r.matches_path(tfs_path))
        .collect();
    if let Some(first) = exact.first() {
        if exact.len() > 1 {
            tracing::warn!(
                url = tfs_url,
                path = tfs_path,
                count = exact.len(),
                chosen = %first.id,
                "multiple remotes match binding exactly"
            );
        }
        return ((*first).clone(), RemoteMatch::Exact);
    }

    if !tfs_path.is_empty()
        && let Some(by_path) = sorted.iter().copied().find(|r| r.matches_path(tfs_path))
    {
        tracing::info!(
            note_url = tfs_url,
            remote_url = %by_path.tfs_url,
            path = tfs_path,
            remote = %by_path.id,
            "binding URL does not match any remote; matched by path"
        );
        return (by_path.clone(), RemoteMatch::PathOnly);
    }

    if let [only] = sorted.as_slice() {
        tracing::info!(
            note_url = tfs_url,
            note_path = tfs_path,
            remote_url = %only.tfs_url,
            remote_path = %only.tfs_path,
            remote = %only.id,
            "binding does not match the sole configured remote; using it anyway"
        );
        return ((*only).clone(), RemoteMatch::SoleRemote);
    }

    tracing::warn!(
        url = tfs_url,
        path = tfs_path,
        "no configured remote matches binding"
    );
    (TfvcRemote::derived(tfs_url, tfs_path), RemoteMatch::Derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(id: &str, url: &str, path: &str) -> TfvcRemote {
        TfvcRemote::new(id, url, path)
    }

    #[test]
    fn exact_match_wins() {
        let remotes = vec![
            remote("a", "https://new.example/tfs", "$/Proj/Main"),
            remote("b", "https://other.example/tfs", "$/Proj/Other"),
        ];
        let (resolved, tier) =
            resolve_remote(&remotes, "HTTPS://NEW.EXAMPLE/TFS", "$/proj/main");
        assert_eq!(resolved.id, "a");
        assert_eq!(tier, RemoteMatch::Exact);
    }

    #[test]
    fn legacy_url_counts_as_exact() {
        let mut r = remote("a", "https://new.example/tfs", "$/Proj/Main");
        r.legacy_urls = vec!["https://old.example/tfs".to_string()];
        let (resolved, tier) =
            resolve_remote(&[r], "https://old.example/tfs", "$/Proj/Main");
        assert_eq!(resolved.id, "a");
        assert_eq!(tier, RemoteMatch::Exact);
    }

    #[test]
    fn exact_tie_breaks_by_id() {
        let remotes = vec![
            remote("zeta", "https://tfs.example", "$/P"),
            remote("alpha", "https://tfs.example", "$/P"),
        ];
        let (resolved, _) = resolve_remote(&remotes, "https://tfs.example", "$/P");
        assert_eq!(resolved.id, "alpha");
    }

    #[test]
    fn path_only_match_when_url_drifted() {
        let remotes = vec![remote("default", "https://new.example/tfs", "$/Proj/Main")];
        let (resolved, tier) =
            resolve_remote(&remotes, "https://old.example/tfs", "$/Proj/Main");
        assert_eq!(resolved.id, "default");
        assert_eq!(tier, RemoteMatch::PathOnly);
    }

    #[test]
    fn sole_remote_fallback() {
        let remotes = vec![remote("default", "https://a.example", "$/A")];
        let (resolved, tier) = resolve_remote(&remotes, "https://b.example", "$/B");
        assert_eq!(resolved.id, "default");
        assert_eq!(tier, RemoteMatch::SoleRemote);
    }

    #[test]
    fn derived_placeholder_when_ambiguous() {
        let remotes = vec![
            remote("a", "https://a.example", "$/A"),
            remote("b", "https://b.example", "$/B"),
        ];
        let (resolved, tier) = resolve_remote(&remotes, "https://c.example", "$/C");
        assert!(resolved.is_derived());
        assert_eq!(tier, RemoteMatch::Derived);
        assert_eq!(resolved.tfs_url, "https://c.example");
        assert_eq!(resolved.tfs_path, "$/C");
    }

    #[test]
    fn empty_path_skips_path_tier() {
        let remotes = vec![
            remote("a", "https://a.example", ""),
            remote("b", "https://b.example", "$/B"),
        ];
        let (resolved, tier) = resolve_remote(&remotes, "https://c.example", "");
        assert!(resolved.is_derived());
        assert_eq!(tier, RemoteMatch::Derived);
    }
}

//! Bidirectional index between changeset ids and commits.
//!
//! The notes namespace is the source of truth; commit-message trailers
//! (`git-tfs-id: ...;C<N>`) are a legacy layer kept readable for
//! repositories that predate the namespace. The index itself is only an
//! in-process cache, populated lazily by walking remote-tracking refs.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use git2::{Oid, Repository, Sort};
use regex::Regex;

use super::error::GitError;
use super::notes::NotesStore;

/// Identity recovered from a legacy commit-message trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyId {
    pub tfs_url: String,
    pub tfs_path: String,
    pub changeset_id: u64,
}

/// Parse the legacy trailer out of a commit message.
///
/// Lines are scanned bottom-up and the last occurrence wins, which is what
/// the right-to-left-anchored regex in older tooling effectively did when
/// metadata appeared more than once. The bracketed `[url]$/path` form is
/// tried first; older writers emitted the trailer without brackets, so any
/// `git-tfs-id:` line ending in `;C<N>` still yields its changeset id.
pub fn parse_legacy_id(message: &str) -> Option<LegacyId> {
    static TRAILER: OnceLock<Regex> = OnceLock::new();
    static TRAILER_LOOSE: OnceLock<Regex> = OnceLock::new();
    let trailer = TRAILER.get_or_init(|| {
        Regex::new(r"^\s*git-tfs-id:\s*\[(?<url>[^\]]*)\](?<path>[^;]*);C(?<cs>\d+)\s*$")
            .expect("legacy trailer regex")
    });
    let loose = TRAILER_LOOSE.get_or_init(|| {
        Regex::new(r"^\s*git-tfs-id:\s*(?<rest>.*);C(?<cs>\d+)\s*$")
            .expect("loose legacy trailer regex")
    });

    for line in message.lines().rev() {
        if let Some(captures) = trailer.captures(line) {
            let changeset_id: u64 = captures.name("cs")?.as_str().parse().ok()?;
            if changeset_id == 0 {
                continue;
            }
            return Some(LegacyId {
                tfs_url: captures.name("url")?.as_str().trim().to_string(),
                tfs_path: captures.name("path")?.as_str().trim().to_string(),
                changeset_id,
            });
        }
        if let Some(captures) = loose.captures(line) {
            let changeset_id: u64 = captures.name("cs")?.as_str().parse().ok()?;
            if changeset_id == 0 {
                continue;
            }
            let (tfs_url, tfs_path) = split_loose_rest(captures.name("rest")?.as_str());
            return Some(LegacyId {
                tfs_url,
                tfs_path,
                changeset_id,
            });
        }
    }
    None
}

/// Best-effort url/path split for a bracket-less trailer body. The server
/// path starts at `$/`; everything before it is the collection URL.
fn split_loose_rest(rest: &str) -> (String, String) {
    let rest = rest.trim();
    match rest.find("$/") {
        Some(at) => {
            let url = rest[..at]
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .trim();
            (url.to_string(), rest[at..].trim().to_string())
        }
        None => (String::new(), rest.to_string()),
    }
}

/// Strip legacy trailers from a message before it is sent to the server.
pub fn strip_legacy_trailers(message: &str) -> String {
    let mut out: Vec<&str> = message
        .lines()
        .filter(|line| !line.trim_start().starts_with("git-tfs-id:"))
        .collect();
    while out.last().is_some_and(|line| line.trim().is_empty()) {
        out.pop();
    }
    out.join("\n")
}

#[derive(Debug, Default)]
pub struct ChangesetIndex {
    cache: BTreeMap<u64, Oid>,
    complete: bool,
}

impl ChangesetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache-fill hook invoked by the checkin driver after a bind.
    pub fn record_pair(&mut self, changeset_id: u64, commit: Oid) {
        self.cache.entry(changeset_id).or_insert(commit);
    }

    /// Find the commit carrying `changeset_id`. `scope_ref` restricts the
    /// scan to remote-tracking refs whose name ends with it.
    pub fn find_commit_by_changeset(
        &mut self,
        repo: &Repository,
        notes: &NotesStore<'_>,
        changeset_id: u64,
        scope_ref: Option<&str>,
    ) -> Result<Option<Oid>, GitError> {
        if let Some(commit) = self.cache.get(&changeset_id) {
            return Ok(Some(*commit));
        }
        if self.complete && scope_ref.is_none() {
            return Ok(None);
        }

        let hit = self.scan(repo, notes, Some(changeset_id), scope_ref)?;
        if hit.is_none() && scope_ref.is_none() {
            // A full unscoped scan saw everything; future misses are misses.
            self.complete = true;
        }
        Ok(hit)
    }

    /// All known pairs, after a full scan.
    pub fn pairs(
        &mut self,
        repo: &Repository,
        notes: &NotesStore<'_>,
    ) -> Result<&BTreeMap<u64, Oid>, GitError> {
        if !self.complete {
            self.scan(repo, notes, None, None)?;
            self.complete = true;
        }
        Ok(&self.cache)
    }

    fn scan(
        &mut self,
        repo: &Repository,
        notes: &NotesStore<'_>,
        target: Option<u64>,
        scope_ref: Option<&str>,
    ) -> Result<Option<Oid>, GitError> {
        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TIME)?;

        let mut pushed = false;
        for reference in repo.references_glob("refs/remotes/*")? {
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            if let Some(scope) = scope_ref
                && !name.ends_with(scope)
            {
                continue;
            }
            if let Some(oid) = reference.target() {
                walk.push(oid)?;
                pushed = true;
            }
        }
        if !pushed {
            return Ok(None);
        }

        for oid in walk {
            let oid = oid?;
            let Some(found) = self.changeset_of(repo, notes, oid)? else {
                continue;
            };

            match self.cache.get(&found) {
                Some(existing) if *existing != oid => {
                    // Data error in a legacy repository: keep the first
                    // commit enumerated.
                    tracing::warn!(
                        changeset = found,
                        kept = %existing,
                        duplicate = %oid,
                        "two commits carry the same changeset id"
                    );
                }
                _ => {
                    self.cache.insert(found, oid);
                }
            }

            if target == Some(found) {
                return Ok(Some(self.cache[&found]));
            }
        }
        Ok(None)
    }

    fn changeset_of(
        &self,
        repo: &Repository,
        notes: &NotesStore<'_>,
        oid: Oid,
    ) -> Result<Option<u64>, GitError> {
        if let Some(binding) = notes.get(oid)? {
            return Ok(Some(binding.changeset_id));
        }
        let commit = repo.find_commit(oid)?;
        Ok(commit
            .message()
            .and_then(parse_legacy_id)
            .map(|legacy| legacy.changeset_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_trailer_parses() {
        let message = "Fix the build\n\ngit-tfs-id: [https://tfs.example/tfs]$/Proj/Main;C123\n";
        let id = parse_legacy_id(message).expect("parse");
        assert_eq!(id.changeset_id, 123);
        assert_eq!(id.tfs_url, "https://tfs.example/tfs");
        assert_eq!(id.tfs_path, "$/Proj/Main");
    }

    #[test]
    fn legacy_trailer_last_occurrence_wins() {
        let message = "squash of two\n\
            git-tfs-id: [https://tfs.example]$/Proj/Main;C7\n\
            more text\n\
            git-tfs-id: [https://tfs.example]$/Proj/Main;C9\n";
        let id = parse_legacy_id(message).expect("parse");
        assert_eq!(id.changeset_id, 9);
    }

    #[test]
    fn legacy_trailer_requires_whole_line() {
        assert!(parse_legacy_id("see git-tfs-id: [u]$/p;C5 in the docs").is_none());
        assert!(parse_legacy_id("no trailer here").is_none());
    }

    #[test]
    fn legacy_trailer_without_brackets_still_resolves() {
        let id = parse_legacy_id("change\n\ngit-tfs-id: https://tfs.example/tfs$/Proj/Main;C7\n")
            .expect("parse");
        assert_eq!(id.changeset_id, 7);
        assert_eq!(id.tfs_url, "https://tfs.example/tfs");
        assert_eq!(id.tfs_path, "$/Proj/Main");
    }

    #[test]
    fn legacy_trailer_with_path_only_resolves() {
        let id = parse_legacy_id("change\n\ngit-tfs-id: $/Proj/Main;C5\n").expect("parse");
        assert_eq!(id.changeset_id, 5);
        assert_eq!(id.tfs_url, "");
        assert_eq!(id.tfs_path, "$/Proj/Main");
    }

    #[test]
    fn strip_removes_trailers_and_trailing_blanks() {
        let message = "Fix the build\n\ngit-tfs-id: [https://tfs.example]$/P;C3\n";
        assert_eq!(strip_legacy_trailers(message), "Fix the build");
    }

    #[test]
    fn record_pair_keeps_first() {
        let mut index = ChangesetIndex::new();
        let a = Oid::from_str("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let b = Oid::from_str("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        index.record_pair(5, a);
        index.record_pair(5, b);
        assert_eq!(index.cache[&5], a);
    }
}

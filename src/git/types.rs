//! Git Cache DTOs: diff summaries, file patches, and paginated commit logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// Single-letter git status, normalized so `?` (untracked) becomes `A` where
/// a concrete label is needed by a caller.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    A,
    M,
    D,
    R,
    C,
    U,
    #[serde(rename = "?")]
    Untracked,
}

impl FileStatus {
    /// Parse a single git porcelain status letter.
    #[must_use]
    pub fn parse(c: char) -> Self {
        match c {
            'A' => Self::A,
            'M' => Self::M,
            'D' => Self::D,
            'R' => Self::R,
            'C' => Self::C,
            'U' => Self::U,
            _ => Self::Untracked,
        }
    }

    /// Normalize `?` (untracked) to `A`, as some callers require a concrete label.
    #[must_use]
    pub const fn normalized(self) -> Self {
        match self {
            Self::Untracked => Self::A,
            other => other,
        }
    }
}

/// One changed file in a [`DiffSummary`].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFileEntry {
    /// Repo-relative path.
    pub path: String,
    /// Status letter.
    pub status: FileStatus,
    /// `true` if the change is staged (index differs from HEAD).
    pub staged: bool,
    /// Prior path, for renames.
    pub renamed_from: Option<String>,
    /// Lines added, when computable.
    pub additions: Option<u32>,
    /// Lines deleted, when computable.
    pub deletions: Option<u32>,
}

/// A working-tree diff summary for one `(paneId, worktreePath)` scope.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    /// Absolute repository root, if resolvable.
    pub repo_root: Option<String>,
    /// Revision the diff was computed against.
    pub rev: Option<String>,
    /// `true` if the underlying `git status`/`diff` output was size-capped.
    pub truncated: bool,
    /// Why the summary could not be fully computed, if at all.
    pub reason: Option<String>,
    /// Per-file entries.
    pub files: Vec<DiffFileEntry>,
}

impl DiffSummary {
    /// Deterministic signature per the data model: `{repoRoot, rev, reason,
    /// truncated, sorted files}`, used to suppress no-op cache replacement.
    #[must_use]
    pub fn signature(&self) -> String {
        let mut files: Vec<&DiffFileEntry> = self.files.iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let payload = serde_json::json!({
            "repoRoot": self.repo_root,
            "rev": self.rev,
            "reason": self.reason,
            "truncated": self.truncated,
            "files": files.iter().map(|f| serde_json::json!({
                "path": f.path,
                "status": f.status,
                "staged": f.staged,
                "renamedFrom": f.renamed_from,
            })).collect::<Vec<_>>(),
        });
        payload.to_string()
    }
}

/// A single patch for one file, capped server-side.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFile {
    /// Repo-relative path.
    pub path: String,
    /// Unified diff text.
    pub patch: String,
    /// `true` if the patch was cut off at the byte cap.
    pub truncated: bool,
}

/// One commit in a [`CommitLog`].
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Full commit hash.
    pub hash: String,
    /// Abbreviated hash.
    pub short_hash: String,
    /// First line of the commit message.
    pub subject: String,
    /// Remaining lines of the commit message.
    pub body: Option<String>,
    /// Author display name.
    pub author_name: String,
    /// Author email, if recorded.
    pub author_email: Option<String>,
    /// Author timestamp.
    pub authored_at: DateTime<Utc>,
}

/// A paged commit log for one `(paneId, worktreePath)` scope.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitLog {
    /// Absolute repository root, if resolvable.
    pub repo_root: Option<String>,
    /// Revision the log was computed against.
    pub rev: Option<String>,
    /// Why the log could not be fully computed, if at all.
    pub reason: Option<String>,
    /// Total commits known so far (grows as pages are appended).
    pub total_count: u64,
    /// Commits, insertion order preserved.
    pub commits: Vec<Commit>,
    /// `true` iff the last page returned exactly `PAGE_SIZE` commits.
    pub has_more: bool,
}

impl CommitLog {
    /// Deterministic signature: `{repoRoot, rev, reason, totalCount, commit hashes}`.
    #[must_use]
    pub fn signature(&self) -> String {
        let hashes: Vec<&str> = self.commits.iter().map(|c| c.hash.as_str()).collect();
        let payload = serde_json::json!({
            "repoRoot": self.repo_root,
            "rev": self.rev,
            "reason": self.reason,
            "totalCount": self.total_count,
            "hashes": hashes,
        });
        payload.to_string()
    }
}

/// One file's patch within a specific commit, keyed by `"<hash>:<path>"`
/// rather than a pointer into the parent commit (no object-graph cycles).
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitFile {
    /// Repo-relative path.
    pub path: String,
    /// Unified diff text for this file within the commit.
    pub patch: String,
    /// `true` if the patch was cut off at the byte cap.
    pub truncated: bool,
}

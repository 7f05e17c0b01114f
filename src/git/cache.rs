//! Git Cache: per-`(paneId, worktreePath)` diff summary, per-file patches,
//! and a paginated commit log, replaced only when its signature changes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use crate::core::errors::CoreError;
use crate::core::subprocess::{SubprocessAdapter, SubprocessOptions};

use super::types::{Commit, CommitFile, CommitLog, DiffFile, DiffFileEntry, DiffSummary, FileStatus};

const COMMIT_PAGE_SIZE: usize = 10;
const COMMIT_LOG_FORMAT: &str = "%H%x1f%h%x1f%an%x1f%ae%x1f%aI%x1f%s%x1f%b%x1e";
const STDOUT_CAP_BYTES: usize = 20 * 1024 * 1024;

fn is_capped(stdout: &str) -> bool {
    stdout.len() >= STDOUT_CAP_BYTES
}

/// Cache key: a pane paired with the worktree path it is scoped to.
pub type CacheKey = (String, String);

#[derive(Default)]
struct GitCacheEntry {
    diff_summary: Option<DiffSummary>,
    diff_signature: Option<String>,
    diff_files: HashMap<String, DiffFile>,
    commit_log: Option<CommitLog>,
    commit_log_signature: Option<String>,
    commit_details: HashMap<String, Commit>,
    commit_files: HashMap<String, CommitFile>,
}

/// Per-pane git state, fed by shelling out to `git`.
pub struct GitCache {
    subprocess: SubprocessAdapter,
    entries: RwLock<HashMap<CacheKey, GitCacheEntry>>,
}

impl GitCache {
    /// Construct an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subprocess: SubprocessAdapter::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Refresh both the diff summary and the first commit-log page for
    /// `(pane_id, worktree_path)`, replacing cached values only if their
    /// signature differs from what is already cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the `git` subprocess cannot be run at all; a
    /// non-zero exit with parseable stdout is tolerated (empty repo, etc.).
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, pane_id: &str, worktree_path: &str) -> Result<(), CoreError> {
        let diff = self.fetch_diff_summary(worktree_path).await?;
        let log = self.fetch_commit_log_page(worktree_path, 0).await?;

        let key = (pane_id.to_owned(), worktree_path.to_owned());
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key).or_default();

        let diff_sig = diff.signature();
        if entry.diff_signature.as_deref() != Some(diff_sig.as_str()) {
            entry.diff_signature = Some(diff_sig);
            entry.diff_summary = Some(diff);
        }

        let log_sig = log.signature();
        if entry.commit_log_signature.as_deref() != Some(log_sig.as_str()) {
            entry.commit_log_signature = Some(log_sig);
            let known_hashes: std::collections::HashSet<&str> = log.commits.iter().map(|c| c.hash.as_str()).collect();
            entry.commit_details.retain(|hash, _| known_hashes.contains(hash.as_str()));
            entry.commit_files.retain(|key, _| known_hashes.iter().any(|h| key.starts_with(&format!("{h}:"))));
            entry.commit_log = Some(log);
        }

        Ok(())
    }

    /// Append the next page of commits (by offset) to the cached log,
    /// merging by hash (first occurrence wins).
    ///
    /// # Errors
    ///
    /// Returns an error if the `git` subprocess cannot be run.
    pub async fn load_more_commits(&self, pane_id: &str, worktree_path: &str) -> Result<bool, CoreError> {
        let key = (pane_id.to_owned(), worktree_path.to_owned());
        let offset = {
            let entries = self.entries.read().await;
            entries.get(&key).and_then(|e| e.commit_log.as_ref()).map_or(0, |l| l.commits.len())
        };

        let page = self.fetch_commit_log_page(worktree_path, offset).await?;
        let has_more = page.has_more;

        let mut entries = self.entries.write().await;
        let entry = entries.entry(key).or_default();
        let existing_hashes: std::collections::HashSet<String> =
            entry.commit_log.as_ref().map(|l| l.commits.iter().map(|c| c.hash.clone()).collect()).unwrap_or_default();

        if let Some(log) = &mut entry.commit_log {
            for commit in page.commits {
                if !existing_hashes.contains(&commit.hash) {
                    log.commits.push(commit);
                }
            }
            log.total_count = log.commits.len() as u64;
            log.has_more = has_more;
        } else {
            entry.commit_log = Some(page);
        }

        Ok(has_more)
    }

    /// Return the cached diff summary, if any.
    pub async fn diff_summary(&self, pane_id: &str, worktree_path: &str) -> Option<DiffSummary> {
        let key = (pane_id.to_owned(), worktree_path.to_owned());
        self.entries.read().await.get(&key).and_then(|e| e.diff_summary.clone())
    }

    /// `true` if the cached diff summary has any changed file. A derived
    /// convenience over `DiffSummary.files`, not its own subprocess call or
    /// cache entry; returns `false` until `refresh` has populated an entry
    /// for this scope.
    pub async fn worktree_dirty(&self, pane_id: &str, worktree_path: &str) -> bool {
        self.diff_summary(pane_id, worktree_path).await.is_some_and(|summary| !summary.files.is_empty())
    }

    /// Fetch (and cache) a single file's patch against the working tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the `git diff` subprocess fails to run.
    pub async fn diff_file(&self, pane_id: &str, worktree_path: &str, path: &str) -> Result<DiffFile, CoreError> {
        let key = (pane_id.to_owned(), worktree_path.to_owned());
        {
            let entries = self.entries.read().await;
            if let Some(file) = entries.get(&key).and_then(|e| e.diff_files.get(path)) {
                return Ok(file.clone());
            }
        }

        let output = self
            .subprocess
            .run("git", &["diff", "--", path], Some(Path::new(worktree_path)), &SubprocessOptions::default())
            .await?;

        let truncated = is_capped(&output.stdout);
        let file = DiffFile {
            path: path.to_owned(),
            patch: output.stdout,
            truncated,
        };

        let mut entries = self.entries.write().await;
        entries.entry(key).or_default().diff_files.insert(path.to_owned(), file.clone());
        Ok(file)
    }

    /// Return the cached commit log, if any.
    pub async fn commit_log(&self, pane_id: &str, worktree_path: &str) -> Option<CommitLog> {
        let key = (pane_id.to_owned(), worktree_path.to_owned());
        self.entries.read().await.get(&key).and_then(|e| e.commit_log.clone())
    }

    /// Return a single commit's detail, fetching it if not already cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the `git show` subprocess fails to run.
    pub async fn commit_detail(&self, pane_id: &str, worktree_path: &str, hash: &str) -> Result<Commit, CoreError> {
        let key = (pane_id.to_owned(), worktree_path.to_owned());
        {
            let entries = self.entries.read().await;
            if let Some(c) = entries.get(&key).and_then(|e| e.commit_details.get(hash)) {
                return Ok(c.clone());
            }
        }

        let format_arg = format!("--format={COMMIT_LOG_FORMAT}");
        let output = self
            .subprocess
            .run(
                "git",
                &["show", "-s", &format_arg, hash],
                Some(Path::new(worktree_path)),
                &SubprocessOptions::default(),
            )
            .await?;

        let commit = parse_commit_records(&output.stdout)
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Internal { reason: format!("commit {hash} not found") })?;

        let mut entries = self.entries.write().await;
        entries.entry(key).or_default().commit_details.insert(hash.to_owned(), commit.clone());
        Ok(commit)
    }

    /// Return a single file's patch within a commit, fetching it if not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the `git show` subprocess fails to run.
    pub async fn commit_file(&self, pane_id: &str, worktree_path: &str, hash: &str, path: &str) -> Result<CommitFile, CoreError> {
        let key = (pane_id.to_owned(), worktree_path.to_owned());
        let cache_key = format!("{hash}:{path}");
        {
            let entries = self.entries.read().await;
            if let Some(f) = entries.get(&key).and_then(|e| e.commit_files.get(&cache_key)) {
                return Ok(f.clone());
            }
        }

        let output = self
            .subprocess
            .run("git", &["show", hash, "--", path], Some(Path::new(worktree_path)), &SubprocessOptions::default())
            .await?;

        let truncated = is_capped(&output.stdout);
        let file = CommitFile {
            path: path.to_owned(),
            patch: output.stdout,
            truncated,
        };

        let mut entries = self.entries.write().await;
        entries.entry(key).or_default().commit_files.insert(cache_key, file.clone());
        Ok(file)
    }

    async fn fetch_diff_summary(&self, worktree_path: &str) -> Result<DiffSummary, CoreError> {
        let repo_root = Path::new(worktree_path).to_string_lossy().into_owned();
        let output = self
            .subprocess
            .run(
                "git",
                &["status", "--porcelain=v1"],
                Some(Path::new(worktree_path)),
                &SubprocessOptions { allow_stdout_on_error: true, ..Default::default() },
            )
            .await?;

        let files = parse_status_lines(&output.stdout);
        let truncated = is_capped(&output.stdout);
        Ok(DiffSummary {
            repo_root: Some(repo_root),
            rev: None,
            truncated,
            reason: None,
            files,
        })
    }

    async fn fetch_commit_log_page(&self, worktree_path: &str, skip: usize) -> Result<CommitLog, CoreError> {
        let repo_root = Path::new(worktree_path).to_string_lossy().into_owned();
        let skip_arg = format!("--skip={skip}");
        let count_arg = format!("-n{COMMIT_PAGE_SIZE}");
        let format_arg = format!("--format={COMMIT_LOG_FORMAT}");
        let output = self
            .subprocess
            .run(
                "git",
                &["log", &skip_arg, &count_arg, &format_arg],
                Some(Path::new(worktree_path)),
                &SubprocessOptions { allow_stdout_on_error: true, ..Default::default() },
            )
            .await?;

        let commits = parse_commit_records(&output.stdout);
        let has_more = commits.len() == COMMIT_PAGE_SIZE;
        Ok(CommitLog {
            repo_root: Some(repo_root),
            rev: None,
            reason: None,
            total_count: commits.len() as u64,
            commits,
            has_more,
        })
    }
}

impl Default for GitCache {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_status_lines(stdout: &str) -> Vec<DiffFileEntry> {
    stdout
        .lines()
        .filter(|l| l.len() >= 3)
        .map(|line| {
            let staged_code = line.as_bytes()[0] as char;
            let unstaged_code = line.as_bytes()[1] as char;
            let rest = &line[3..];
            let (path, renamed_from) = rest
                .split_once(" -> ")
                .map_or((rest.to_owned(), None), |(from, to)| (to.to_owned(), Some(from.to_owned())));

            let status = if unstaged_code != ' ' {
                FileStatus::parse(unstaged_code)
            } else {
                FileStatus::parse(staged_code)
            };

            DiffFileEntry {
                path,
                status: status.normalized(),
                staged: staged_code != ' ' && staged_code != '?',
                renamed_from,
                additions: None,
                deletions: None,
            }
        })
        .collect()
}

fn parse_commit_records(stdout: &str) -> Vec<Commit> {
    stdout
        .split('\u{1e}')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .filter_map(|record| {
            let fields: Vec<&str> = record.split('\u{1f}').collect();
            let [hash, short_hash, author_name, author_email, authored_at, subject, body] = fields[..] else {
                return None;
            };
            let authored_at: DateTime<Utc> = DateTime::parse_from_rfc3339(authored_at).ok()?.with_timezone(&Utc);
            Some(Commit {
                hash: hash.to_owned(),
                short_hash: short_hash.to_owned(),
                subject: subject.to_owned(),
                body: if body.trim().is_empty() { None } else { Some(body.trim().to_owned()) },
                author_name: author_name.to_owned(),
                author_email: if author_email.is_empty() { None } else { Some(author_email.to_owned()) },
                authored_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parses_rename() {
        let entries = parse_status_lines("R  old.txt -> new.txt\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "new.txt");
        assert_eq!(entries[0].renamed_from.as_deref(), Some("old.txt"));
    }

    #[test]
    fn status_line_normalizes_untracked() {
        let entries = parse_status_lines("?? new.txt\n");
        assert_eq!(entries[0].status, FileStatus::A);
    }

    #[test]
    fn diff_summary_signature_is_stable_under_file_reorder() {
        let a = DiffSummary {
            repo_root: Some("/r".to_owned()),
            rev: None,
            truncated: false,
            reason: None,
            files: vec![
                DiffFileEntry { path: "b.txt".to_owned(), status: FileStatus::M, staged: false, renamed_from: None, additions: None, deletions: None },
                DiffFileEntry { path: "a.txt".to_owned(), status: FileStatus::M, staged: false, renamed_from: None, additions: None, deletions: None },
            ],
        };
        let b = DiffSummary { files: vec![a.files[1].clone(), a.files[0].clone()], ..a.clone() };
        assert_eq!(a.signature(), b.signature());
    }

    #[tokio::test]
    async fn worktree_dirty_reflects_cached_diff_summary() {
        let cache = GitCache::new();
        let key = ("pane-1".to_owned(), "/repo".to_owned());

        assert!(!cache.worktree_dirty("pane-1", "/repo").await);

        cache.entries.write().await.entry(key.clone()).or_default().diff_summary = Some(DiffSummary {
            repo_root: Some("/repo".to_owned()),
            rev: None,
            truncated: false,
            reason: None,
            files: vec![DiffFileEntry {
                path: "a.txt".to_owned(),
                status: FileStatus::M,
                staged: false,
                renamed_from: None,
                additions: None,
                deletions: None,
            }],
        });
        assert!(cache.worktree_dirty("pane-1", "/repo").await);

        cache.entries.write().await.get_mut(&key).unwrap().diff_summary = Some(DiffSummary {
            repo_root: Some("/repo".to_owned()),
            rev: None,
            truncated: false,
            reason: None,
            files: Vec::new(),
        });
        assert!(!cache.worktree_dirty("pane-1", "/repo").await);
    }
}

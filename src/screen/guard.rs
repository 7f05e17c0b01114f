//! Dangerous-command guard: matches configurable regex patterns against
//! keystroke text, tolerating split transmissions via a rolling tail buffer.

use regex::Regex;
use std::sync::Mutex;

/// Per-pane rolling buffer + compiled patterns used to detect a dangerous
/// command line even when it arrives split across two `sendText` calls.
pub struct DangerousCommandGuard {
    patterns: Vec<Regex>,
    tail_len: usize,
    tail: Mutex<String>,
}

impl DangerousCommandGuard {
    /// Compile `patterns` (invalid regexes are skipped with a warning) and
    /// size the rolling tail buffer to at least the longest pattern's
    /// source length, per the open question in the design notes.
    #[must_use]
    pub fn new(patterns: &[String]) -> Self {
        let compiled: Vec<Regex> = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid dangerous-command pattern, skipping");
                    None
                }
            })
            .collect();
        let tail_len = patterns.iter().map(String::len).max().unwrap_or(0).max(64);

        Self {
            patterns: compiled,
            tail_len,
            tail: Mutex::new(String::new()),
        }
    }

    /// Check `text` against the configured patterns, concatenated with the
    /// rolling tail from prior calls. Returns `true` if a pattern matches
    /// (the caller should reject with `DANGEROUS_COMMAND` unless the client
    /// opted in). Updates the tail regardless of the match outcome.
    #[expect(clippy::unwrap_used, reason = "mutex is never poisoned: guarded section never panics")]
    pub fn check(&self, text: &str) -> bool {
        let mut tail = self.tail.lock().unwrap();
        let combined = format!("{tail}{text}");
        let matched = self.patterns.iter().any(|p| p.is_match(&combined));

        let keep_from = combined.len().saturating_sub(self.tail_len);
        *tail = combined[keep_from..].to_owned();

        matched
    }

    /// Reset the rolling tail buffer (e.g. after a pane is reset).
    #[expect(clippy::unwrap_used, reason = "mutex is never poisoned: guarded section never panics")]
    pub fn reset(&self) {
        self.tail.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_call_blocks_dangerous_command() {
        let guard = DangerousCommandGuard::new(&[r"rm\s+-rf\s+/".to_owned()]);
        assert!(guard.check("rm -rf /"));
    }

    #[test]
    fn invariant_9_dangerous_text_split_across_two_calls() {
        let guard = DangerousCommandGuard::new(&[r"rm\s+-rf\s+/".to_owned()]);
        assert!(!guard.check("rm "));
        assert!(guard.check("-rf /"));
    }

    #[test]
    fn benign_text_is_not_flagged() {
        let guard = DangerousCommandGuard::new(&[r"rm\s+-rf\s+/".to_owned()]);
        assert!(!guard.check("ls -la"));
        assert!(!guard.check("echo hello"));
    }
}

//! Cursor-based delta protocol: computing the minimal hunk sequence between
//! two line arrays, applying it, and the full-vs-delta heuristic.

use super::types::ScreenDelta;

/// Full-rescind thresholds, preserved verbatim per the design notes: prefer
/// a full re-render over deltas when changes are pervasive.
pub const FULL_RESCIND_LINE_THRESHOLD: usize = 200;
pub const FULL_RESCIND_RATIO_THRESHOLD: f64 = 0.5;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Compute the line-level edit script between `before` and `after` via an
/// LCS backtrack, then group contiguous non-equal runs into hunks whose
/// `start` already accounts for the cumulative line-count shift of earlier
/// hunks in the same batch (so sequential application to one mutating array
/// is correct).
#[must_use]
pub fn build_deltas(before: &[String], after: &[String]) -> Vec<ScreenDelta> {
    let ops = edit_script(before, after);

    let mut raw_hunks: Vec<(usize, usize, Vec<String>)> = Vec::new(); // (before_start, delete_count, insert_lines)
    let mut before_idx = 0usize;
    let mut after_idx = 0usize;
    let mut i = 0usize;

    while i < ops.len() {
        match ops[i] {
            Op::Equal => {
                before_idx += 1;
                after_idx += 1;
                i += 1;
            }
            Op::Delete | Op::Insert => {
                let hunk_before_start = before_idx;
                let mut delete_count = 0usize;
                let mut insert_lines = Vec::new();
                while i < ops.len() && ops[i] != Op::Equal {
                    match ops[i] {
                        Op::Delete => {
                            delete_count += 1;
                            before_idx += 1;
                        }
                        Op::Insert => {
                            insert_lines.push(after[after_idx].clone());
                            after_idx += 1;
                        }
                        Op::Equal => unreachable!(),
                    }
                    i += 1;
                }
                raw_hunks.push((hunk_before_start, delete_count, insert_lines));
            }
        }
    }

    let mut offset: i64 = 0;
    raw_hunks
        .into_iter()
        .map(|(start, delete_count, insert_lines)| {
            #[expect(clippy::cast_sign_loss, reason = "offset kept non-negative by construction for ascending, non-overlapping hunks")]
            let adjusted_start = (start as i64 + offset) as usize;
            offset += insert_lines.len() as i64 - delete_count as i64;
            ScreenDelta {
                start: adjusted_start,
                delete_count,
                insert_lines,
            }
        })
        .collect()
}

/// Apply `deltas` to `before` in order, returning the resulting line array.
#[must_use]
pub fn apply_deltas(before: &[String], deltas: &[ScreenDelta]) -> Vec<String> {
    let mut lines = before.to_vec();
    for delta in deltas {
        let end = (delta.start + delta.delete_count).min(lines.len());
        let start = delta.start.min(lines.len()).min(end);
        lines.splice(start..end, delta.insert_lines.iter().cloned());
    }
    lines
}

/// `true` when the computed deltas should be discarded in favor of a full
/// re-render: more than half the lines changed, more than
/// [`FULL_RESCIND_LINE_THRESHOLD`] lines changed, or the hunk count is large
/// enough to be its own form of pervasive change.
#[must_use]
pub fn should_send_full(before_len: usize, deltas: &[ScreenDelta]) -> bool {
    let changed_lines: usize = deltas.iter().map(|d| d.delete_count.max(d.insert_lines.len())).sum();
    if changed_lines > FULL_RESCIND_LINE_THRESHOLD {
        return true;
    }
    if before_len > 0 && (changed_lines as f64 / before_len as f64) > FULL_RESCIND_RATIO_THRESHOLD {
        return true;
    }
    false
}

fn edit_script(before: &[String], after: &[String]) -> Vec<Op> {
    let n = before.len();
    let m = after.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if before[i] == after[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let mut i = 0;
    let mut j = 0;
    while i < n && j < m {
        if before[i] == after[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    while i < n {
        ops.push(Op::Delete);
        i += 1;
    }
    while j < m {
        ops.push(Op::Insert);
        j += 1;
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn s6_git_delta_apply() {
        let before = lines(&["a", "b", "c", "d", "e"]);
        let after = lines(&["a", "x", "c", "d", "y"]);
        let deltas = build_deltas(&before, &after);
        assert!(deltas.len() >= 2, "expected at least two hunks, got {}", deltas.len());
        let applied = apply_deltas(&before, &deltas);
        assert_eq!(applied, after);
    }

    #[test]
    fn identical_arrays_produce_no_deltas() {
        let before = lines(&["a", "b", "c"]);
        let deltas = build_deltas(&before, &before);
        assert!(deltas.is_empty());
        assert_eq!(apply_deltas(&before, &deltas), before);
    }

    #[test]
    fn full_rescind_triggers_above_ratio_threshold() {
        let before_len = 10;
        let deltas = vec![ScreenDelta {
            start: 0,
            delete_count: 6,
            insert_lines: vec!["x".to_owned(); 6],
        }];
        assert!(should_send_full(before_len, &deltas));
    }

    #[test]
    fn full_rescind_triggers_above_line_threshold() {
        let deltas = vec![ScreenDelta {
            start: 0,
            delete_count: 0,
            insert_lines: vec!["x".to_owned(); FULL_RESCIND_LINE_THRESHOLD + 1],
        }];
        assert!(should_send_full(10_000, &deltas));
    }

    #[test]
    fn small_change_does_not_trigger_full_rescind() {
        let deltas = vec![ScreenDelta {
            start: 0,
            delete_count: 1,
            insert_lines: vec!["x".to_owned()],
        }];
        assert!(!should_send_full(1000, &deltas));
    }

    #[test]
    fn appended_lines_produce_single_insert_hunk() {
        let before = lines(&["a", "b"]);
        let after = lines(&["a", "b", "c"]);
        let deltas = build_deltas(&before, &after);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].start, 2);
        assert_eq!(apply_deltas(&before, &deltas), after);
    }
}

//! Line-level diff between the before and after snapshots of a file
//!
//! The diff uses a Longest Common Subsequence table over the lines that
//! remain after stripping the common prefix and suffix, then groups the
//! changes into unified hunks with configurable context.
//!
//! ## Examples
//!
//! ```rust
//! use promptlog::diff::{create_file_diff, render_unified};
//! use promptlog::types::{DiffOptions, FileOp};
//!
//! let old = b"line1\nline2\nline3";
//! let new = b"line1\nline2 modified\nline3\nline4";
//!
//! let diff = create_file_diff("notes.txt", FileOp::Modified, old, new, &DiffOptions::default());
//! assert_eq!((diff.lines_added, diff.lines_deleted), (2, 1));
//! assert!(render_unified(&diff).contains("+line2 modified"));
//! ```

use crate::types::{DiffHunk, DiffOptions, FileDiff, FileOp, LineChange};
use std::fmt::Write;

/// Above this many table cells the middle section is diffed as a block
const MAX_LCS_CELLS: usize = 4_000_000;

/// Represents a change operation in the diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOp {
    Keep(usize, usize),
    Delete(usize),
    Insert(usize),
}

impl ChangeOp {
    fn is_change(&self) -> bool {
        !matches!(self, ChangeOp::Keep(_, _))
    }
}

/// Compute line-level diff hunks between two contents
pub fn compute_line_diff(old_content: &[u8], new_content: &[u8], options: &DiffOptions) -> Vec<DiffHunk> {
    let old_text = String::from_utf8_lossy(old_content);
    let new_text = String::from_utf8_lossy(new_content);
    let old_lines: Vec<&str> = old_text.lines().collect();
    let new_lines: Vec<&str> = new_text.lines().collect();

    if old_lines.is_empty() && new_lines.is_empty() {
        return Vec::new();
    }

    let changes = compute_changes(&old_lines, &new_lines, options.ignore_whitespace);
    create_hunks(&changes, &old_lines, &new_lines, options.context_lines)
}

/// Check if two lines are equal, optionally ignoring whitespace
fn lines_equal(a: &str, b: &str, ignore_whitespace: bool) -> bool {
    if ignore_whitespace {
        a.trim() == b.trim()
    } else {
        a == b
    }
}

fn compute_changes(old_lines: &[&str], new_lines: &[&str], ignore_whitespace: bool) -> Vec<ChangeOp> {
    let eq = |a: &str, b: &str| lines_equal(a, b, ignore_whitespace);

    let prefix = old_lines
        .iter()
        .zip(new_lines)
        .take_while(|(a, b)| eq(a, b))
        .count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(a, b)| eq(a, b))
        .count();

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];

    let mut changes: Vec<ChangeOp> = (0..prefix).map(|i| ChangeOp::Keep(i, i)).collect();

    if old_mid.len().saturating_mul(new_mid.len()) > MAX_LCS_CELLS {
        changes.extend((0..old_mid.len()).map(|i| ChangeOp::Delete(prefix + i)));
        changes.extend((0..new_mid.len()).map(|i| ChangeOp::Insert(prefix + i)));
    } else {
        let lcs = compute_lcs(old_mid, new_mid, ignore_whitespace);
        changes.extend(lcs_to_changes(&lcs, old_mid.len(), new_mid.len()).into_iter().map(|op| match op {
            ChangeOp::Keep(o, n) => ChangeOp::Keep(o + prefix, n + prefix),
            ChangeOp::Delete(o) => ChangeOp::Delete(o + prefix),
            ChangeOp::Insert(n) => ChangeOp::Insert(n + prefix),
        }));
    }

    let old_tail = old_lines.len() - suffix;
    let new_tail = new_lines.len() - suffix;
    changes.extend((0..suffix).map(|i| ChangeOp::Keep(old_tail + i, new_tail + i)));
    changes
}

/// Compute longest common subsequence using dynamic programming
fn compute_lcs(old_lines: &[&str], new_lines: &[&str], ignore_whitespace: bool) -> Vec<(usize, usize)> {
    let m = old_lines.len();
    let n = new_lines.len();
    let mut dp = vec![vec![0u32; n + 1]; m + 1];

    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if lines_equal(old_lines[i - 1], new_lines[j - 1], ignore_whitespace) {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut lcs = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if lines_equal(old_lines[i - 1], new_lines[j - 1], ignore_whitespace) {
            lcs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    lcs.reverse();
    lcs
}

fn lcs_to_changes(lcs: &[(usize, usize)], old_len: usize, new_len: usize) -> Vec<ChangeOp> {
    let mut changes = Vec::with_capacity(old_len + new_len);
    let (mut old_idx, mut new_idx) = (0, 0);

    for &(lcs_old, lcs_new) in lcs {
        changes.extend((old_idx..lcs_old).map(ChangeOp::Delete));
        changes.extend((new_idx..lcs_new).map(ChangeOp::Insert));
        changes.push(ChangeOp::Keep(lcs_old, lcs_new));
        old_idx = lcs_old + 1;
        new_idx = lcs_new + 1;
    }
    changes.extend((old_idx..old_len).map(ChangeOp::Delete));
    changes.extend((new_idx..new_len).map(ChangeOp::Insert));
    changes
}

/// Group change operations into hunks, merging ones whose context overlaps
fn create_hunks(
    changes: &[ChangeOp],
    old_lines: &[&str],
    new_lines: &[&str],
    context_lines: usize,
) -> Vec<DiffHunk> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for (i, op) in changes.iter().enumerate() {
        if !op.is_change() {
            continue;
        }
        let start = i.saturating_sub(context_lines);
        let end = (i + context_lines + 1).min(changes.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| build_hunk(&changes[start..end], changes, start, old_lines, new_lines))
        .collect()
}

fn build_hunk(
    window: &[ChangeOp],
    all: &[ChangeOp],
    offset: usize,
    old_lines: &[&str],
    new_lines: &[&str],
) -> DiffHunk {
    // Positions on each side where the hunk starts
    let (old_pos, new_pos) = all[..offset].iter().fold((0, 0), |(o, n), op| match op {
        ChangeOp::Keep(_, _) => (o + 1, n + 1),
        ChangeOp::Delete(_) => (o + 1, n),
        ChangeOp::Insert(_) => (o, n + 1),
    });

    let mut from_count = 0;
    let mut to_count = 0;
    let mut lines = Vec::with_capacity(window.len());
    for op in window {
        match *op {
            ChangeOp::Keep(o, _) => {
                from_count += 1;
                to_count += 1;
                lines.push(LineChange::Context(o + 1, old_lines[o].to_string()));
            }
            ChangeOp::Delete(o) => {
                from_count += 1;
                lines.push(LineChange::Deleted(o + 1, old_lines[o].to_string()));
            }
            ChangeOp::Insert(n) => {
                to_count += 1;
                lines.push(LineChange::Added(n + 1, new_lines[n].to_string()));
            }
        }
    }

    DiffHunk {
        from_line: if from_count == 0 { old_pos } else { old_pos + 1 },
        from_count,
        to_line: if to_count == 0 { new_pos } else { new_pos + 1 },
        to_count,
        changes: lines,
    }
}

/// Check if content appears to be binary
pub fn is_binary_content(content: &[u8]) -> bool {
    // Simple heuristic: check for null bytes in first 8KB
    let check_len = content.len().min(8192);
    content[..check_len].contains(&0)
}

/// Create a [`FileDiff`] from the two sides of a file
pub fn create_file_diff(
    path: &str,
    op: FileOp,
    old_content: &[u8],
    new_content: &[u8],
    options: &DiffOptions,
) -> FileDiff {
    let is_binary = is_binary_content(old_content) || is_binary_content(new_content);
    let limit = options.max_file_size;
    let too_large = limit > 0 && (old_content.len() as u64 > limit || new_content.len() as u64 > limit);

    let hunks = if is_binary || too_large {
        Vec::new()
    } else {
        compute_line_diff(old_content, new_content, options)
    };

    let (mut lines_added, mut lines_deleted) = (0, 0);
    for change in hunks.iter().flat_map(|h| &h.changes) {
        match change {
            LineChange::Added(_, _) => lines_added += 1,
            LineChange::Deleted(_, _) => lines_deleted += 1,
            LineChange::Context(_, _) => {}
        }
    }

    FileDiff {
        path: path.to_string(),
        op,
        is_binary,
        too_large,
        hunks,
        lines_added,
        lines_deleted,
    }
}

/// Number of lines that differ between two contents
pub fn changed_line_count(old_content: &[u8], new_content: &[u8]) -> usize {
    let options = DiffOptions { context_lines: 0, ..Default::default() };
    let diff = create_file_diff("", FileOp::Modified, old_content, new_content, &options);
    diff.lines_added + diff.lines_deleted
}

/// Render a diff in unified format
pub fn render_unified(diff: &FileDiff) -> String {
    let mut out = String::new();
    let (from, to) = match diff.op {
        FileOp::Added => ("/dev/null".to_string(), format!("b/{}", diff.path)),
        FileOp::Deleted => (format!("a/{}", diff.path), "/dev/null".to_string()),
        FileOp::Modified => (format!("a/{}", diff.path), format!("b/{}", diff.path)),
    };
    let _ = writeln!(out, "--- {}", from);
    let _ = writeln!(out, "+++ {}", to);

    if diff.is_binary {
        out.push_str("Binary files differ\n");
        return out;
    }
    if diff.too_large {
        out.push_str("File too large to diff\n");
        return out;
    }

    for hunk in &diff.hunks {
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            hunk.from_line, hunk.from_count, hunk.to_line, hunk.to_count
        );
        for change in &hunk.changes {
            let _ = match change {
                LineChange::Context(_, line) => writeln!(out, " {}", line),
                LineChange::Deleted(_, line) => writeln!(out, "-{}", line),
                LineChange::Added(_, line) => writeln!(out, "+{}", line),
            };
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_diff() {
        let old = b"line1\nline2\nline3";
        let new = b"line1\nline2 modified\nline3\nline4";

        let hunks = compute_line_diff(old, new, &DiffOptions::default());
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert_eq!((hunk.from_line, hunk.from_count), (1, 3));
        assert_eq!((hunk.to_line, hunk.to_count), (1, 4));
        assert!(hunk.changes.contains(&LineChange::Deleted(2, "line2".to_string())));
        assert!(hunk.changes.contains(&LineChange::Added(4, "line4".to_string())));
    }

    #[test]
    fn test_empty_files() {
        let options = DiffOptions::default();
        assert!(compute_line_diff(b"", b"", &options).is_empty());

        let added = compute_line_diff(b"", b"new line", &options);
        assert_eq!(added.len(), 1);
        assert_eq!((added[0].from_line, added[0].from_count), (0, 0));
        assert!(added[0].changes.iter().all(|c| matches!(c, LineChange::Added(_, _))));

        let deleted = compute_line_diff(b"old line", b"", &options);
        assert_eq!((deleted[0].to_line, deleted[0].to_count), (0, 0));
        assert!(deleted[0].changes.iter().all(|c| matches!(c, LineChange::Deleted(_, _))));
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_binary_content(b"hello\x00world"));
        assert!(!is_binary_content(b"hello world"));

        let diff = create_file_diff("img.png", FileOp::Modified, b"\x00\x01", b"\x00\x02", &DiffOptions::default());
        assert!(diff.is_binary);
        assert!(diff.hunks.is_empty());
        assert!(render_unified(&diff).contains("Binary files differ"));
    }

    #[test]
    fn test_context_lines_and_separate_hunks() {
        let old = b"1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n11\n12";
        let new = b"1\nTWO\n3\n4\n5\n6\n7\n8\n9\n10\nELEVEN\n12";
        let options = DiffOptions { context_lines: 2, ..Default::default() };

        let hunks = compute_line_diff(old, new, &options);
        assert_eq!(hunks.len(), 2);
        assert_eq!((hunks[1].from_line, hunks[1].from_count), (9, 4));

        let merged = compute_line_diff(old, new, &DiffOptions { context_lines: 5, ..Default::default() });
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_ignore_whitespace() {
        let options = DiffOptions { ignore_whitespace: true, ..Default::default() };
        assert!(compute_line_diff(b"a\n  b\n", b"a\nb  \n", &options).is_empty());
    }

    #[test]
    fn test_render_unified() {
        let diff = create_file_diff("src/a.ts", FileOp::Added, b"", b"x\ny", &DiffOptions::default());
        let text = render_unified(&diff);
        assert!(text.starts_with("--- /dev/null\n+++ b/src/a.ts\n"));
        assert!(text.contains("@@ -0,0 +1,2 @@\n+x\n+y\n"));
    }

    #[test]
    fn test_changed_line_count() {
        assert_eq!(changed_line_count(b"a\nb\nc", b"a\nB\nc\nd"), 3);
        assert_eq!(changed_line_count(b"same", b"same"), 0);
    }
}

//! Event summaries
//!
//! Summarization is delegated to a [`Summarizer`]. Hosts plug in their own
//! (for example one backed by a language model); [`DiffStatSummarizer`]
//! works offline from line counts. Results are cached by the façade in
//! `summaries/<event-id>.md`.

use crate::error::Result;
use crate::types::{Event, FileDiff, FileOp};
use std::fmt::Write;

/// Everything a summarizer gets to look at
#[derive(Debug, Clone, Copy)]
pub struct SummaryInput<'a> {
    /// The event being summarized
    pub event: &'a Event,
    /// Per-file diffs between the before and after snapshots
    pub diffs: &'a [FileDiff],
}

/// Produces a Markdown summary of an event
pub trait Summarizer: Send + Sync {
    /// Summarize one event
    fn summarize(&self, input: &SummaryInput<'_>) -> Result<String>;
}

/// Offline summarizer listing files and line counts
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffStatSummarizer;

impl Summarizer for DiffStatSummarizer {
    fn summarize(&self, input: &SummaryInput<'_>) -> Result<String> {
        let event = input.event;
        let headline = event.prompt.lines().next().unwrap_or_default().trim();
        let added: usize = input.diffs.iter().map(|d| d.lines_added).sum();
        let deleted: usize = input.diffs.iter().map(|d| d.lines_deleted).sum();
        let (files_added, files_modified, files_deleted) = event.op_counts();

        let mut out = String::new();
        let _ = writeln!(out, "**{}**", headline);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} file{} changed ({} added, {} modified, {} deleted), +{} -{} lines.",
            event.files_changed.len(),
            if event.files_changed.len() == 1 { "" } else { "s" },
            files_added,
            files_modified,
            files_deleted,
            added,
            deleted
        );
        let _ = writeln!(out);

        for diff in input.diffs {
            let detail = if diff.is_binary {
                "binary".to_string()
            } else if diff.too_large {
                "too large to diff".to_string()
            } else {
                format!("+{} -{}", diff.lines_added, diff.lines_deleted)
            };
            let verb = match diff.op {
                FileOp::Added => "added",
                FileOp::Modified => "modified",
                FileOp::Deleted => "deleted",
            };
            let _ = writeln!(out, "- `{}` {} ({})", diff.path, verb, detail);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::create_file_diff;
    use crate::types::{DiffEntry, DiffOptions, AFTER_REF_WORKING};
    use std::path::PathBuf;

    #[test]
    fn test_diff_stat_summary() {
        let event = Event {
            id: "e1".to_string(),
            timestamp: 0,
            prompt: "Fix the login bug\nwith more detail".to_string(),
            response_preview: None,
            repo_root: PathBuf::from("/repo"),
            before_ref: None,
            after_ref: AFTER_REF_WORKING.to_string(),
            files_changed: vec!["src/login.rs".to_string()],
            diff_uris: vec![DiffEntry {
                path: "src/login.rs".to_string(),
                left: None,
                right: None,
                op: FileOp::Modified,
            }],
            tags: vec![],
        };
        let diffs = vec![create_file_diff(
            "src/login.rs",
            FileOp::Modified,
            b"a\nb\n",
            b"a\nc\nd\n",
            &DiffOptions::default(),
        )];

        let summary = DiffStatSummarizer
            .summarize(&SummaryInput { event: &event, diffs: &diffs })
            .unwrap();
        assert!(summary.starts_with("**Fix the login bug**"));
        assert!(summary.contains("1 file changed (0 added, 1 modified, 0 deleted), +2 -1 lines."));
        assert!(summary.contains("- `src/login.rs` modified (+2 -1)"));
    }
}

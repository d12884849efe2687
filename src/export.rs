//! Markdown export of an event

use crate::diff::render_unified;
use crate::types::{Event, FileDiff};
use std::fmt::Write;

/// Render an event and its per-file diffs as a Markdown document
pub fn render_markdown(event: &Event, diffs: &[FileDiff]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Prompt event {}", event.short_id());
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Id:** `{}`", event.id);
    let _ = writeln!(out, "- **Logged:** {}", event.created_at().to_rfc3339());
    let _ = writeln!(out, "- **Repository:** `{}`", event.repo_root.display());
    let _ = writeln!(
        out,
        "- **Before:** `{}`",
        event.before_ref.as_deref().unwrap_or("(no checkpoint)")
    );
    let _ = writeln!(out, "- **After:** `{}`", event.after_ref);
    if !event.tags.is_empty() {
        let _ = writeln!(out, "- **Tags:** {}", event.tags.join(", "));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Prompt");
    let _ = writeln!(out);
    for line in event.prompt.lines() {
        let _ = writeln!(out, "> {}", line);
    }
    let _ = writeln!(out);

    if let Some(response) = &event.response_preview {
        let _ = writeln!(out, "## Response");
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", response.trim_end());
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Files ({})", event.files_changed.len());
    let _ = writeln!(out);
    for diff in diffs {
        let _ = writeln!(out, "### `{}` ({})", diff.path, diff.op);
        let _ = writeln!(out);
        if diff.is_binary {
            let _ = writeln!(out, "_Binary file, not shown._");
        } else if diff.too_large {
            let _ = writeln!(out, "_File too large to diff._");
        } else {
            let _ = writeln!(out, "```diff");
            out.push_str(&render_unified(diff));
            let _ = writeln!(out, "```");
        }
        let _ = writeln!(out);
    }
    out
}

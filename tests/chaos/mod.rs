//! Chaos tests for PromptLog
//!
//! Damages storage and the working tree in the ways a crash, a careless
//! edit or a hostile log line would, and checks that every operation
//! degrades per file instead of failing wholesale.

use crate::support::*;
use ::promptlog::*;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;

fn rewrite_log(storage: &Path, edit: impl Fn(&mut Value)) {
    let path = storage.join("events.jsonl");
    let content = fs::read_to_string(&path).unwrap();
    let mut out = String::new();
    for line in content.lines() {
        let mut value: Value = serde_json::from_str(line).unwrap();
        edit(&mut value);
        out.push_str(&serde_json::to_string(&value).unwrap());
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

#[test]
fn test_corrupt_log_line_is_skipped() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    // A crash mid-append leaves half a line without a newline
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(fx.storage().join("events.jsonl"))
        .unwrap();
    file.write_all(b"{\"id\":\"truncat").unwrap();
    drop(file);

    let events = fx.log.list_events(ListMode::Active).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, event.id);

    // The next append starts on a fresh line
    fx.write("src/d.ts", "export const d = 4;\n");
    let next = fx.log_prompt("after the crash").event;
    let ids: Vec<String> = fx
        .log
        .list_events(ListMode::Active)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![next.id, event.id]);
}

#[test]
fn test_foreign_and_traversal_handles_are_skipped() {
    let fx = Fixture::new();
    let event = fx.abc123_event();
    let a_before = fx.read("src/a.ts");

    rewrite_log(&fx.storage(), |value| {
        let entries = value["diffUris"].as_array_mut().unwrap();
        for entry in entries {
            let path = entry["path"].as_str().unwrap().to_string();
            match path.as_str() {
                // Points at another event's snapshot tree
                "src/a.ts" => entry["left"] = Value::from("snap:11111111-2222-4000-8000-333333333333:before:src/a.ts"),
                // Tries to climb out of the snapshot directory
                "src/c.ts" => entry["left"] = Value::from(format!("snap:{}:before:../../../etc/passwd", event.id)),
                _ => {}
            }
        }
    });

    let loaded = fx.log.get_event(&event.id).unwrap();
    assert!(loaded.entry("src/c.ts").unwrap().left.is_none());

    let report = fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(fx.read("src/a.ts"), a_before);
    assert_eq!(fx.read("src/c.ts"), None);
    assert_eq!(fx.read("src/b.ts"), None);
}

#[test]
fn test_missing_snapshot_skips_only_that_file() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    fs::remove_file(
        fx.storage()
            .join("snapshots")
            .join(&event.id)
            .join("before")
            .join("src/a.ts"),
    )
    .unwrap();

    let report = fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    let skipped: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.outcome, RestoreOutcome::Skipped(_)))
        .map(|o| o.path.as_str())
        .collect();
    assert_eq!(skipped, vec!["src/a.ts"]);
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 2;\n"));
    assert_eq!(fx.read("src/c.ts").as_deref(), Some("export const c = 3;\n"));

    // The diff treats the missing side as empty
    let diff = fx.log.event_diff(&event.id, "src/a.ts").unwrap();
    assert_eq!(diff.lines_deleted, 0);
    assert_eq!(diff.lines_added, 1);
}

#[test]
fn test_backup_failure_leaves_tree_untouched() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    // A file where the backups directory should be
    fs::write(fx.storage().join("backups"), b"in the way").unwrap();

    let result = fx.log.restore(&event.id, Side::Before, RestoreScope::All);
    match result {
        Err(err @ PromptLogError::BackupFailed { .. }) => assert!(err.is_recoverable()),
        other => panic!("expected a backup failure, got {:?}", other.map(|r| r.summary())),
    }
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 2;\n"));
    assert_eq!(fx.read("src/b.ts").as_deref(), Some("export const b = 2;\n"));
    assert_eq!(fx.read("src/c.ts"), None);
    assert!(!fx.log.status().unwrap().undo_available);
}

#[test]
fn test_tampered_backup_is_not_replayed() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    let report = fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    fs::write(report.backup_dir.join("files").join("src/a.ts"), "tampered").unwrap();

    let undo = fx.log.undo_last_restore().unwrap();
    assert_eq!(undo.errors, 1);
    assert!(undo.warnings[0].starts_with("src/a.ts"));
    // Other entries still replayed
    assert_eq!(fx.read("src/b.ts").as_deref(), Some("export const b = 2;\n"));
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 1;\n"));
}

#[test]
fn test_purge_reports_partial_failure() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    // A directory where the cached summary would be cannot be removed as a file
    fs::create_dir_all(fx.storage().join("summaries").join(format!("{}.md", event.id)).join("x")).unwrap();
    fx.log.export_markdown(&event.id).unwrap();

    let report = fx.log.purge(&event.id).unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.errors.len(), 1);
    assert!(report.log_entry_removed);
    assert!(report.snapshots_removed);
    assert!(report.export_removed);
    assert!(matches!(fx.log.get_event(&event.id), Err(PromptLogError::EventNotFound(_))));
}

#[test]
fn test_unreadable_trash_index_counts_as_empty() {
    let fx = Fixture::new();
    let event = fx.abc123_event();
    fs::write(fx.storage().join("trash.json"), b"not json").unwrap();

    assert_eq!(fx.log.list_events(ListMode::Active).unwrap().len(), 1);
    assert!(fx.log.trash(&event.id).unwrap());
    assert_eq!(fx.log.list_events(ListMode::Trash).unwrap().len(), 1);
}

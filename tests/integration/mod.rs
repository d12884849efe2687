//! End-to-end scenarios through the PromptLog façade
//!
//! Covers capture with and without a checkpoint, restore of either side,
//! undo, retention, trash and purge, and the derived artifacts.

use crate::support::*;
use ::promptlog::*;
use std::fs;
use std::sync::Arc;
use std::thread;

#[test]
fn test_abc123_event_classification() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    assert_eq!(event.before_ref.as_deref(), Some("abc123"));
    assert_eq!(event.after_ref, AFTER_REF_WORKING);
    assert_eq!(event.files_changed, vec!["src/a.ts", "src/b.ts", "src/c.ts"]);
    assert_eq!(event.files_changed.len(), event.diff_uris.len());

    let ops: Vec<FileOp> = event.diff_uris.iter().map(|e| e.op).collect();
    assert_eq!(ops, vec![FileOp::Modified, FileOp::Added, FileOp::Deleted]);

    // Every handle belongs to this event
    for entry in &event.diff_uris {
        for handle in [&entry.left, &entry.right].into_iter().flatten() {
            assert_eq!(handle.event_id(), event.id);
            assert_eq!(handle.rel_path(), entry.path);
        }
    }

    // Checkpoint consumed, touched set cleared
    let status = fx.log.status().unwrap();
    assert!(status.checkpoint.is_none());
    assert_eq!(status.touched_files, 0);
}

#[test]
fn test_restore_before_then_after() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    let report = fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    assert_eq!((report.restored, report.deleted, report.skipped, report.errors), (2, 1, 0, 0));
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 1;\n"));
    assert_eq!(fx.read("src/b.ts"), None);
    assert_eq!(fx.read("src/c.ts").as_deref(), Some("export const c = 3;\n"));

    let report = fx.log.restore(&event.id, Side::After, RestoreScope::All).unwrap();
    assert_eq!((report.restored, report.deleted), (2, 1));
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 2;\n"));
    assert_eq!(fx.read("src/b.ts").as_deref(), Some("export const b = 2;\n"));
    assert_eq!(fx.read("src/c.ts"), None);
}

#[test]
fn test_single_file_restore() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    let report = fx
        .log
        .restore(&event.id[..8], Side::Before, RestoreScope::Path("./src/a.ts".to_string()))
        .unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].outcome, RestoreOutcome::Restored);
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 1;\n"));
    // Others untouched
    assert_eq!(fx.read("src/b.ts").as_deref(), Some("export const b = 2;\n"));

    let missing = fx
        .log
        .restore(&event.id, Side::Before, RestoreScope::Path("src/zzz.ts".to_string()));
    assert!(matches!(missing, Err(PromptLogError::PathNotInEvent { .. })));
}

#[test]
fn test_undo_puts_back_the_pre_restore_tree() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    // Local edit after logging; restore must not lose it for good
    fx.write("src/a.ts", "export const a = 42;\n");
    fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    assert_eq!(fx.read("src/b.ts"), None);

    let undo = fx.log.undo_last_restore().unwrap();
    assert_eq!(undo.errors, 0);
    assert_eq!(undo.restored, 2);
    assert_eq!(undo.deleted, 1);
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 42;\n"));
    assert_eq!(fx.read("src/b.ts").as_deref(), Some("export const b = 2;\n"));
    assert_eq!(fx.read("src/c.ts"), None);

    // One-shot
    assert!(matches!(fx.log.undo_last_restore(), Err(PromptLogError::NothingToUndo)));
}

#[test]
fn test_undo_from_backup_directory() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    let first = fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    assert_eq!(fx.log.latest_backup().unwrap().as_deref(), Some(first.backup_dir.as_path()));

    let undo = fx.log.undo_from(&first.backup_dir).unwrap();
    assert_eq!(undo.errors, 0);
    assert_eq!(fx.read("src/a.ts").as_deref(), Some("export const a = 2;\n"));
    assert!(fx.root.join("src/b.ts").exists());
}

#[test]
fn test_log_without_checkpoint_records_all_changes() {
    let fx = Fixture::new();
    fx.write("keep.txt", "same\n");
    fx.write("gone.txt", "bye\n");
    fx.source.commit("r1");

    fx.write("new.txt", "hi\n");
    fx.write("keep.txt", "changed\n");
    fx.remove("gone.txt");

    let event = fx.log_prompt("No checkpoint").event;
    assert!(event.before_ref.is_none());
    assert!(!event.has_synthetic_checkpoint());
    let ops: Vec<(&str, FileOp)> = event.diff_uris.iter().map(|e| (e.path.as_str(), e.op)).collect();
    assert_eq!(
        ops,
        vec![
            ("gone.txt", FileOp::Deleted),
            ("keep.txt", FileOp::Added),
            ("new.txt", FileOp::Added),
        ]
    );

    // The source's own reference still backs the diff
    let diff = fx.log.event_diff(&event.id, "keep.txt").unwrap();
    assert_eq!((diff.lines_added, diff.lines_deleted), (1, 1));
}

#[test]
fn test_nothing_to_log_leaves_state_alone() {
    let fx = Fixture::new();
    fx.write("a.txt", "a\n");
    fx.source.commit("r1");
    fx.log.start_session().unwrap();
    fx.log.create_checkpoint().unwrap();

    let outcome = fx.log.log_prompt("idle", None, vec![]).unwrap();
    assert!(matches!(outcome, BuildOutcome::NothingToLog));
    assert_eq!(fx.log.status().unwrap().checkpoint.as_deref(), Some("r1"));
    assert!(fx.log.list_events(ListMode::Active).unwrap().is_empty());
    assert!(!fx.storage().join("snapshots").exists()
        || fs::read_dir(fx.storage().join("snapshots")).unwrap().next().is_none());
}

#[test]
fn test_retention_drops_oldest_and_their_snapshots() {
    let fx = Fixture::with_builder(PromptLogBuilder::new().max_events(2));
    fx.source.commit("r0");

    let mut ids = Vec::new();
    for i in 0..3 {
        fx.write("f.txt", &format!("version {}\n", i));
        let report = fx.log_prompt(&format!("prompt {}", i));
        ids.push(report.event.id.clone());
        if i == 2 {
            assert_eq!(report.trimmed, vec![ids[0].clone()]);
        }
    }

    let listed: Vec<String> = fx
        .log
        .list_events(ListMode::Active)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(listed, vec![ids[2].clone(), ids[1].clone()]);
    assert!(!fx.storage().join("snapshots").join(&ids[0]).exists());
    assert!(fx.storage().join("snapshots").join(&ids[1]).exists());
    assert!(matches!(fx.log.get_event(&ids[0]), Err(PromptLogError::EventNotFound(_))));
}

#[test]
fn test_retention_cleans_up_summaries_exports_and_trash() {
    let fx = Fixture::with_builder(PromptLogBuilder::new().max_events(1));
    fx.source.commit("r0");

    fx.write("f.txt", "one\n");
    let first = fx.log_prompt("first").event;
    fx.log.summarize(&first.id, &DiffStatSummarizer).unwrap();
    let export = fx.log.export_markdown(&first.id).unwrap();
    assert!(fx.log.trash(&first.id).unwrap());

    fx.write("f.txt", "two\n");
    let second = fx.log_prompt("second");
    assert_eq!(second.trimmed, vec![first.id.clone()]);

    assert!(!export.exists());
    assert!(!fx.storage().join("summaries").join(format!("{}.md", first.id)).exists());
    assert!(fx.log.list_events(ListMode::Trash).unwrap().is_empty());
    let trash = fs::read_to_string(fx.storage().join("trash.json")).unwrap();
    assert!(!trash.contains(&first.id));
    assert!(matches!(fx.log.resolve_id(&first.id), Err(PromptLogError::EventNotFound(_))));
}

#[test]
fn test_binary_file_from_checkpoint_is_modified_and_restorable() {
    let fx = Fixture::new();
    fx.write_bytes("img.bin", b"\0\x01v1");
    fx.source.commit("r0");
    fx.log.start_session().unwrap();
    fx.log.create_checkpoint().unwrap();

    fx.write_bytes("img.bin", b"\0\x01v2");
    fx.log.record_edit("img.bin", 1);
    let report = fx.log_prompt("regenerate image");
    assert!(report.warnings().is_empty());
    let event = report.event;
    assert_eq!(event.entry("img.bin").unwrap().op, FileOp::Modified);

    let diff = fx.log.event_diff(&event.id, "img.bin").unwrap();
    assert!(diff.is_binary);

    let restored = fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    assert_eq!((restored.restored, restored.deleted), (1, 0));
    assert_eq!(fs::read(fx.root.join("img.bin")).unwrap(), b"\0\x01v1");
}

#[test]
fn test_trash_is_reversible_and_purge_is_not() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    assert!(fx.log.trash(&event.id).unwrap());
    assert!(!fx.log.trash(&event.id).unwrap());
    assert!(fx.log.list_events(ListMode::Active).unwrap().is_empty());
    assert_eq!(fx.log.list_events(ListMode::Trash).unwrap().len(), 1);
    assert!(fx.storage().join("snapshots").join(&event.id).exists());

    // Trashed events stay fully usable
    fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
    assert!(fx.log.untrash(&event.id).unwrap());
    assert_eq!(fx.log.list_events(ListMode::Active).unwrap().len(), 1);

    fx.log.summarize(&event.id, &DiffStatSummarizer).unwrap();
    fx.log.export_markdown(&event.id).unwrap();
    fx.log.trash(&event.id).unwrap();

    let report = fx.log.purge(&event.id).unwrap();
    assert!(report.is_clean());
    assert!(report.log_entry_removed);
    assert!(report.snapshots_removed);
    assert!(report.summary_removed);
    assert!(report.export_removed);
    assert!(report.trash_entry_removed);
    assert!(fx.log.list_events(ListMode::Trash).unwrap().is_empty());
    assert!(matches!(fx.log.get_event(&event.id), Err(PromptLogError::EventNotFound(_))));
}

#[test]
fn test_search_matches_prompt_paths_and_tags() {
    let fx = Fixture::new();
    fx.source.commit("r0");
    fx.write("src/login.rs", "fn login() {}\n");
    fx.log
        .log_prompt("Fix the LOGIN flow", None, vec!["auth".to_string()])
        .unwrap();

    assert_eq!(fx.log.search("login", ListMode::Active).unwrap().len(), 1);
    assert_eq!(fx.log.search("SRC/LOGIN", ListMode::Active).unwrap().len(), 1);
    assert_eq!(fx.log.search("auth", ListMode::Active).unwrap().len(), 1);
    assert!(fx.log.search("payments", ListMode::Active).unwrap().is_empty());
    assert!(fx.log.search("login", ListMode::Trash).unwrap().is_empty());
}

struct FixedSummarizer(&'static str);

impl Summarizer for FixedSummarizer {
    fn summarize(&self, _input: &SummaryInput<'_>) -> Result<String> {
        Ok(self.0.to_string())
    }
}

#[test]
fn test_summary_is_cached_and_export_written() {
    let fx = Fixture::new();
    let event = fx.abc123_event();

    assert_eq!(fx.log.cached_summary(&event.id).unwrap(), None);
    let first = fx.log.summarize(&event.id, &FixedSummarizer("first")).unwrap();
    let second = fx.log.summarize(&event.id, &FixedSummarizer("second")).unwrap();
    assert_eq!(first, "first");
    assert_eq!(second, "first");
    assert_eq!(fx.log.cached_summary(&event.id).unwrap().as_deref(), Some("first"));

    let path = fx.log.export_markdown(&event.id).unwrap();
    let doc = fs::read_to_string(path).unwrap();
    assert!(doc.contains("> Bump a, add b, drop c"));
    assert!(doc.contains("-export const a = 1;"));
    assert!(doc.contains("+export const a = 2;"));
    assert!(doc.contains("+++ b/src/b.ts"));
}

#[test]
fn test_concurrent_readers_during_logging() {
    let fx = Fixture::new();
    fx.source.commit("r0");
    let log = Arc::new(fx.log);
    let root = fx.root.clone();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for _ in 0..10 {
                    let events = log.list_events(ListMode::Active).unwrap();
                    for event in events {
                        assert_eq!(event.files_changed.len(), event.diff_uris.len());
                    }
                }
            })
        })
        .collect();

    for i in 0..5 {
        fs::write(root.join(format!("file_{}.txt", i)), format!("content {}\n", i)).unwrap();
        log.log_prompt(&format!("prompt {}", i), None, vec![]).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(log.list_events(ListMode::Active).unwrap().len(), 5);
}

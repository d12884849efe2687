//! Property-based testing for PromptLog
//!
//! Uses proptest to check classification, restore planning, retention and
//! the before/after restore round trip over generated inputs.

use crate::support::*;
use ::promptlog::diff::{changed_line_count, create_file_diff};
use ::promptlog::snapshot::SnapshotStore;
use ::promptlog::store::EventStore;
use ::promptlog::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Before), Just(Side::After)]
}

fn op_strategy() -> impl Strategy<Value = FileOp> {
    prop_oneof![Just(FileOp::Added), Just(FileOp::Modified), Just(FileOp::Deleted)]
}

/// Small file names in up to two directory levels
fn path_strategy() -> impl Strategy<Value = String> {
    (prop::collection::vec("[a-d]{1,3}", 0..=2), "[a-e]{1,4}\\.txt")
        .prop_map(|(dirs, name)| {
            let mut parts = dirs;
            parts.push(name);
            parts.join("/")
        })
}

fn content_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z ]{0,12}", 0..6).prop_map(|lines| {
        lines.iter().map(|l| format!("{}\n", l)).collect()
    })
}

/// What happens to one file between checkpoint and log
#[derive(Debug, Clone)]
enum Mutation {
    Keep,
    Rewrite(String),
    Delete,
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        Just(Mutation::Keep),
        content_strategy().prop_map(Mutation::Rewrite),
        Just(Mutation::Delete),
    ]
}

fn dummy_event(n: usize) -> Event {
    Event {
        id: format!("00000000-0000-4000-8000-{:012}", n),
        timestamp: n as i64,
        prompt: format!("prompt {}", n),
        response_preview: None,
        repo_root: PathBuf::from("/repo"),
        before_ref: None,
        after_ref: AFTER_REF_WORKING.to_string(),
        files_changed: Vec::new(),
        diff_uris: Vec::new(),
        tags: Vec::new(),
    }
}

proptest! {
    #[test]
    fn prop_classify(exists_now: bool, has_checkpoint: bool, existed: bool) {
        let op = FileOp::classify(exists_now, has_checkpoint, existed);
        prop_assert_eq!(op == FileOp::Deleted, !exists_now);
        prop_assert_eq!(op == FileOp::Modified, exists_now && has_checkpoint && existed);
    }

    #[test]
    fn prop_restore_plan(op in op_strategy(), side in side_strategy()) {
        let expect_delete = matches!(
            (side, op),
            (Side::After, FileOp::Deleted) | (Side::Before, FileOp::Added)
        );
        prop_assert_eq!(RestoreAction::plan(op, side) == RestoreAction::Delete, expect_delete);
    }

    #[test]
    fn prop_handles_never_escape(
        id in "[a-f0-9-]{1,36}",
        segments in prop::collection::vec(prop_oneof!["[a-z]{1,4}", Just("..".to_string())], 1..5),
    ) {
        let rel = segments.join("/");
        let parsed = SnapshotHandle::parse(&format!("snap:{}:before:{}", id, rel));
        if segments.iter().any(|s| s == "..") {
            prop_assert!(parsed.is_none());
        } else {
            let handle = parsed.unwrap();
            prop_assert_eq!(handle.rel_path(), rel.as_str());
            prop_assert_eq!(handle.event_id(), id.as_str());
        }
    }

    #[test]
    fn prop_line_counts_balance(old in content_strategy(), new in content_strategy()) {
        let diff = create_file_diff("f.txt", FileOp::Modified, old.as_bytes(), new.as_bytes(), &DiffOptions::default());
        let old_lines = old.lines().count() as isize;
        let new_lines = new.lines().count() as isize;
        prop_assert_eq!(diff.lines_added as isize - diff.lines_deleted as isize, new_lines - old_lines);
        prop_assert_eq!(changed_line_count(old.as_bytes(), old.as_bytes()), 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_retention_keeps_newest(total in 1usize..12, max in 0usize..6) {
        let temp_dir = TempDir::new().unwrap();
        let store = EventStore::new(
            temp_dir.path().to_path_buf(),
            SnapshotStore::new(temp_dir.path().join("snapshots")),
        );

        let mut trimmed_total = 0;
        for n in 0..total {
            trimmed_total += store.append(&dummy_event(n), max).unwrap().len();
        }

        let kept = store.list(ListMode::Active).unwrap();
        let expected = if max == 0 { total } else { total.min(max) };
        prop_assert_eq!(kept.len(), expected);
        prop_assert_eq!(trimmed_total, total - expected);
        // Newest first, and the newest always survives
        prop_assert_eq!(&kept[0].id, &dummy_event(total - 1).id);
        prop_assert!(kept.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_restore_round_trip(
        initial in prop::collection::btree_map(path_strategy(), content_strategy(), 1..6),
        mutations in prop::collection::vec(mutation_strategy(), 6),
        created in prop::collection::btree_map(path_strategy(), content_strategy(), 0..3),
    ) {
        let fx = Fixture::new();
        for (path, content) in &initial {
            fx.write(path, content);
        }
        fx.source.commit("base");
        fx.log.start_session().unwrap();
        fx.log.create_checkpoint().unwrap();

        // Apply mutations and new files, reporting every path as touched
        let mut expected_after: BTreeMap<String, String> = BTreeMap::new();
        for ((path, content), mutation) in initial.iter().zip(mutations.iter().cycle()) {
            match mutation {
                Mutation::Keep => {
                    expected_after.insert(path.clone(), content.clone());
                }
                Mutation::Rewrite(new) => {
                    fx.write(path, new);
                    expected_after.insert(path.clone(), new.clone());
                }
                Mutation::Delete => fx.remove(path),
            }
            fx.log.record_edit(path, 1);
        }
        for (path, content) in &created {
            // A new file cannot shadow a directory or file from the initial tree
            if initial.contains_key(path) || fx.root.join(path).exists() {
                continue;
            }
            if fx.root.join(path).parent().map(|p| p.is_file()).unwrap_or(false) {
                continue;
            }
            fx.write(path, content);
            expected_after.insert(path.clone(), content.clone());
            fx.log.record_edit(path, 1);
        }

        let event = match fx.log.log_prompt("generated", None, vec![]).unwrap() {
            BuildOutcome::Logged(report) => report.event,
            BuildOutcome::NothingToLog => return Ok(()),
        };

        let all_paths: Vec<String> = initial.keys().chain(expected_after.keys()).cloned().collect();

        fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
        for path in &all_paths {
            prop_assert_eq!(fx.read(path), initial.get(path).cloned(), "before: {}", path);
        }

        fx.log.restore(&event.id, Side::After, RestoreScope::All).unwrap();
        for path in &all_paths {
            prop_assert_eq!(fx.read(path), expected_after.get(path).cloned(), "after: {}", path);
        }
    }
}

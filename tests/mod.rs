//! Main test module for PromptLog
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end scenarios
//! - Chaos tests for damaged storage and working trees
//! - Property-based tests for invariants
//! - Edge cases around file names and directory layout

pub mod chaos;
pub mod integration;
pub mod property;
pub mod support;

#[cfg(test)]
mod edge_cases {
    use crate::support::*;
    use ::promptlog::*;
    use std::fs;

    #[test]
    fn test_unicode_filenames() {
        let fx = Fixture::new();
        fx.source.commit("r0");
        fx.log.start_session().unwrap();
        fx.log.create_checkpoint().unwrap();

        let names = ["файл.txt", "文件.txt", "file with spaces.txt", "🚀.txt"];
        let mut created = Vec::new();
        for name in names {
            if fs::write(fx.root.join(name), format!("Unicode content: {}\n", name)).is_ok() {
                fx.log.record_edit(name, 1);
                created.push(name);
            }
        }
        if created.is_empty() {
            return;
        }

        let event = fx.log_prompt("unicode").event;
        assert_eq!(event.files_changed.len(), created.len());

        fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
        for name in &created {
            assert!(!fx.root.join(name).exists());
        }
        fx.log.restore(&event.id, Side::After, RestoreScope::All).unwrap();
        for name in &created {
            assert_eq!(fx.read(name), Some(format!("Unicode content: {}\n", name)));
        }
    }

    #[test]
    fn test_restore_removes_emptied_directories() {
        let fx = Fixture::new();
        fx.write("keep.txt", "k\n");
        fx.source.commit("r0");
        fx.log.start_session().unwrap();
        fx.log.create_checkpoint().unwrap();

        fx.write("deep/nested/dir/new.txt", "n\n");
        fx.log.record_edit("deep/nested/dir/new.txt", 1);
        let event = fx.log_prompt("nested").event;

        fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
        assert!(!fx.root.join("deep").exists());
        assert!(fx.root.join("keep.txt").exists());

        // Undo recreates the parents
        fx.log.undo_last_restore().unwrap();
        assert_eq!(fx.read("deep/nested/dir/new.txt").as_deref(), Some("n\n"));
    }

    #[test]
    fn test_storage_directory_is_never_logged() {
        let fx = Fixture::new();
        fx.source.commit("r0");
        fx.log.start_session().unwrap();
        fx.log.create_checkpoint().unwrap();

        fx.write("a.txt", "a\n");
        fx.log.record_edit("a.txt", 1);
        fx.log.record_edit(&format!("{}/events.jsonl", STORAGE_DIR), 1);
        let event = fx.log_prompt("only a").event;
        assert_eq!(event.files_changed, vec!["a.txt"]);
    }

    #[test]
    fn test_empty_prompt_rejected_before_any_work() {
        let fx = Fixture::new();
        fx.source.commit("r0");
        fx.write("a.txt", "a\n");
        assert!(matches!(
            fx.log.log_prompt(" \n\t", None, vec![]),
            Err(PromptLogError::EmptyPrompt)
        ));
        assert!(fx.log.list_events(ListMode::Active).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_replaces_symlink_instead_of_following_it() {
        let fx = Fixture::new();
        fx.write("a.txt", "v1\n");
        fx.source.commit("r0");
        fx.log.start_session().unwrap();
        fx.log.create_checkpoint().unwrap();
        fx.write("a.txt", "v2\n");
        fx.log.record_edit("a.txt", 1);
        let event = fx.log_prompt("edit a").event;

        // Someone swaps the file for a link to something outside the tree
        let outside = fx.temp_dir.path().join("outside.txt");
        fs::write(&outside, "precious\n").unwrap();
        fs::remove_file(fx.root.join("a.txt")).unwrap();
        std::os::unix::fs::symlink(&outside, fx.root.join("a.txt")).unwrap();

        fx.log.restore(&event.id, Side::Before, RestoreScope::All).unwrap();
        assert_eq!(fs::read_to_string(&outside).unwrap(), "precious\n");
        let meta = fs::symlink_metadata(fx.root.join("a.txt")).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(fx.read("a.txt").as_deref(), Some("v1\n"));
    }
}

//! # PromptLog - Prompt-scoped change history
//!
//! Records what an AI-assisted edit session changed, one prompt at a time,
//! and lets you put any file back the way it was before or after a prompt.
//!
//! ## Overview
//!
//! Every logged prompt becomes an immutable [`Event`]:
//! - The prompt text, an optional response preview and tags
//! - The list of files the prompt changed, each classified as added,
//!   modified or deleted
//! - Content-addressed snapshots of each file's before and after state,
//!   stored under the event's own directory
//!
//! Events live in an append-only JSON-lines log. They can be listed,
//! searched, diffed, summarized, exported to Markdown, trashed (soft
//! delete) and purged (hard delete).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use promptlog::{BuildOutcome, PromptLog, RestoreScope, Side};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let log = PromptLog::init(
//!     PathBuf::from("./my_project"),
//!     PathBuf::from("./my_project/.promptlog"),
//! )?;
//!
//! // Pin the state before the assistant starts editing
//! log.start_session()?;
//! log.create_checkpoint()?;
//!
//! // ... the assistant edits files; the editor reports them ...
//! log.record_edit("src/lib.rs", 12);
//!
//! // Record the prompt together with what it changed
//! if let BuildOutcome::Logged(report) = log.log_prompt("Add error handling", None, vec![])? {
//!     println!("Logged {} files", report.event.files_changed.len());
//!
//!     // Changed your mind? Put everything back, with a backup.
//!     let restore = log.restore(&report.event.id, Side::Before, RestoreScope::All)?;
//!     println!("{}", restore.summary());
//!
//!     // ...and undo the restore itself
//!     log.undo_last_restore()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Diff sources** ([`source`]): Git (`git status` plus `git show`) or a
//!   plain directory compared against a baseline copy kept in storage
//! - **Event builder** ([`builder`]): decides which files belong to an event
//!   and snapshots them in parallel
//! - **Event store** ([`store`]): the log, the trash set and cached
//!   summaries and exports
//! - **Restore engine** ([`restore`]): backup, then apply; every restore
//!   produces an undo manifest
//! - **Session** ([`session`]): checkpoint, touched files and the
//!   large-edit nudge
//!
//! ## Safety
//!
//! - Snapshot handles are validated and must belong to the event being read
//! - Paths escaping the repository are rejected
//! - A restore never touches the working tree unless its backup succeeded
//! - Mutations take a storage-wide file lock, so concurrent processes
//!   serialize
//!
//! ## Module Organization
//!
//! - [`promptlog`]: The façade and its builder
//! - [`types`]: Events, reports and configuration
//! - [`diff`]: Line diffs between snapshots
//! - [`summary`] and [`export`]: Derived artifacts
//! - [`watcher`]: File-system watcher reporting line-counted edits to the session
//! - [`error`]: Error types and handling

// Public API modules
pub mod builder;
pub mod diff;
pub mod error;
pub mod export;
pub mod lock;
pub mod promptlog;
pub mod restore;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod summary;
pub mod types;
pub mod watcher;

// Internal modules (not part of public API)
mod utils;

// Re-export main types for convenience
pub use error::{PromptLogError, Result};
pub use promptlog::{PromptLog, PromptLogBuilder};
pub use restore::UndoManifest;
pub use session::{KeyValueStore, MemoryStore, Nudge};
pub use snapshot::SnapshotHandle;
pub use source::{DiffSource, DirectorySource, GitSource, RefContent, WorkingChange};
pub use summary::{DiffStatSummarizer, Summarizer, SummaryInput};
pub use types::*;
pub use utils::{format_bytes, short_id};
pub use watcher::{EditSink, EditWatcher};

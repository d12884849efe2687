//! Core data types used throughout the promptlog library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Events**: `Event`, `DiffEntry`, `FileOp` - what a logged prompt recorded
//! - **Operation parameters**: `Side`, `RestoreScope`, `ListMode`, `DiffOptions`
//! - **Operation results**: `BuildReport`, `RestoreReport`, `UndoReport`, `PurgeReport`
//! - **Configuration**: `PromptLogConfig`
//!
//! ## Examples
//!
//! ```rust
//! use promptlog::types::{FileOp, Side, RestoreAction};
//!
//! // Restoring the "before" side of an added file removes it
//! assert_eq!(RestoreAction::plan(FileOp::Added, Side::Before), RestoreAction::Delete);
//! assert_eq!(RestoreAction::plan(FileOp::Added, Side::After), RestoreAction::Write);
//! ```

use crate::snapshot::{self, SnapshotHandle};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Marker stored in [`Event::after_ref`]: working tree content at log time
pub const AFTER_REF_WORKING: &str = "WORKING_TREE";

/// Prefix of synthetic checkpoint tokens used when no revision is available
pub const WORKING_REF_PREFIX: &str = ":working:";

/// Classification of a changed file relative to its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    /// File did not exist at the checkpoint (or no checkpoint was set)
    Added,
    /// File existed at the checkpoint and still exists
    Modified,
    /// File no longer exists on disk
    Deleted,
}

impl FileOp {
    /// Lowercase name as used in the event log
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOp::Added => "added",
            FileOp::Modified => "modified",
            FileOp::Deleted => "deleted",
        }
    }

    /// Classify a file from its presence now and at the checkpoint
    ///
    /// `deleted` wins whenever the file is gone from disk; otherwise a file is
    /// `added` when there was no checkpoint or it was absent there.
    pub fn classify(exists_now: bool, has_checkpoint: bool, existed_at_checkpoint: bool) -> Self {
        if !exists_now {
            FileOp::Deleted
        } else if !has_checkpoint || !existed_at_checkpoint {
            FileOp::Added
        } else {
            FileOp::Modified
        }
    }
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which snapshot of an event a restore targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// State at the checkpoint
    Before,
    /// State at log time
    After,
}

impl Side {
    /// Directory / token name of this side
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Before => "before",
            Side::After => "after",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "before" => Ok(Side::Before),
            "after" => Ok(Side::After),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// What a restore does to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreAction {
    /// Overwrite the working-tree file with snapshot content
    Write,
    /// Remove the working-tree file
    Delete,
}

impl RestoreAction {
    /// Decide between deleting and writing for a classified file
    pub fn plan(op: FileOp, side: Side) -> Self {
        match (side, op) {
            (Side::After, FileOp::Deleted) => RestoreAction::Delete,
            (Side::Before, FileOp::Added) => RestoreAction::Delete,
            _ => RestoreAction::Write,
        }
    }
}

/// Files targeted by a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreScope {
    /// Every file of the event
    All,
    /// A single repo-relative path
    Path(String),
}

/// Visibility filter for listing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListMode {
    /// Events not in the trash
    #[default]
    Active,
    /// Trashed events only
    Trash,
}

/// One changed file of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Forward-slash repo-relative path
    pub path: String,
    /// Snapshot of the checkpoint state, if it was written
    #[serde(default, deserialize_with = "snapshot::lenient_handle")]
    pub left: Option<SnapshotHandle>,
    /// Snapshot of the log-time state, if it was written
    #[serde(default, deserialize_with = "snapshot::lenient_handle")]
    pub right: Option<SnapshotHandle>,
    /// Classification computed at build time
    pub op: FileOp,
}

impl DiffEntry {
    /// Snapshot handle for a side
    pub fn handle(&self, side: Side) -> Option<&SnapshotHandle> {
        match side {
            Side::Before => self.left.as_ref(),
            Side::After => self.right.as_ref(),
        }
    }
}

/// A recorded prompt and the file changes that followed it
///
/// Immutable once persisted. The id names the event's snapshot directory
/// and is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Creation time in milliseconds since the epoch
    pub timestamp: i64,
    /// Prompt text
    pub prompt: String,
    /// Optional short response text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    /// Working tree this event belongs to
    pub repo_root: PathBuf,
    /// Checkpoint reference, `None` when logged straight from the working tree
    #[serde(default)]
    pub before_ref: Option<String>,
    /// Always [`AFTER_REF_WORKING`]
    pub after_ref: String,
    /// Changed paths in build order
    pub files_changed: Vec<String>,
    /// One entry per changed path
    pub diff_uris: Vec<DiffEntry>,
    /// Free-text labels
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Event {
    /// Get a short version of the ID for display
    pub fn short_id(&self) -> &str {
        crate::utils::short_id(&self.id)
    }

    /// Creation time as a UTC datetime
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Entry for a path, if the event touched it
    pub fn entry(&self, path: &str) -> Option<&DiffEntry> {
        self.diff_uris.iter().find(|e| e.path == path)
    }

    /// Whether the event was built against a synthetic working-tree checkpoint
    pub fn has_synthetic_checkpoint(&self) -> bool {
        self.before_ref
            .as_deref()
            .map(|r| r.starts_with(WORKING_REF_PREFIX))
            .unwrap_or(false)
    }

    /// Case-insensitive substring match over prompt, paths and tags
    ///
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.prompt.to_lowercase().contains(needle)
            || self.files_changed.iter().any(|p| p.to_lowercase().contains(needle))
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }

    /// Count of added, modified and deleted files
    pub fn op_counts(&self) -> (usize, usize, usize) {
        self.diff_uris.iter().fold((0, 0, 0), |(a, m, d), e| match e.op {
            FileOp::Added => (a + 1, m, d),
            FileOp::Modified => (a, m + 1, d),
            FileOp::Deleted => (a, m, d + 1),
        })
    }
}

/// Outcome of writing one side of one file's snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    /// Real content was captured
    Written {
        /// Bytes written
        bytes: u64,
    },
    /// The file was absent on this side; a zero-byte placeholder was written
    Placeholder,
    /// The snapshot could not be written; the entry has no handle for this side
    Failed(String),
}

/// Per-file result of building an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshotOutcome {
    /// Repo-relative path
    pub path: String,
    /// Classification
    pub op: FileOp,
    /// Result for the before side
    pub before: SnapshotStatus,
    /// Result for the after side
    pub after: SnapshotStatus,
}

/// Result of a successful build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    /// The event that was built (and persisted, when returned by the façade)
    pub event: Event,
    /// Per-file snapshot outcomes, in `event.files_changed` order
    pub files: Vec<FileSnapshotOutcome>,
    /// Ids of events dropped by retention while persisting
    #[serde(default)]
    pub trimmed: Vec<String>,
}

impl BuildReport {
    /// Human-readable warnings for every snapshot that failed
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for file in &self.files {
            if let SnapshotStatus::Failed(reason) = &file.before {
                warnings.push(format!("{}: before snapshot failed: {}", file.path, reason));
            }
            if let SnapshotStatus::Failed(reason) = &file.after {
                warnings.push(format!("{}: after snapshot failed: {}", file.path, reason));
            }
        }
        warnings
    }
}

/// Result of asking the façade to log a prompt
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// No (touched) changes; nothing was written and the session is unchanged
    NothingToLog,
    /// The event was built and persisted
    Logged(BuildReport),
}

/// What happened to one file during a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreOutcome {
    /// Snapshot content written
    Restored,
    /// File removed (or already absent)
    Deleted,
    /// Not touched: missing or untrusted snapshot, or unsafe path
    Skipped(String),
    /// Unexpected I/O failure
    Error(String),
}

/// Per-file restore result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRestoreOutcome {
    /// Repo-relative path
    pub path: String,
    /// Result
    pub outcome: RestoreOutcome,
}

/// Result of a restore operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Event that was restored
    pub event_id: String,
    /// Side that was applied
    pub side: Side,
    /// Files written from a snapshot
    pub restored: usize,
    /// Files removed
    pub deleted: usize,
    /// Files left alone because their snapshot or path was not usable
    pub skipped: usize,
    /// Files that failed unexpectedly
    pub errors: usize,
    /// Per-file details
    pub outcomes: Vec<FileRestoreOutcome>,
    /// Directory holding the backup and undo manifest
    pub backup_dir: PathBuf,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl RestoreReport {
    /// One-line summary of the counts
    pub fn summary(&self) -> String {
        format!(
            "{} restored, {} deleted, {} skipped, {} errors",
            self.restored, self.deleted, self.skipped, self.errors
        )
    }
}

/// Result of replaying an undo manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndoReport {
    /// Files written back from the backup
    pub restored: usize,
    /// Files removed because they did not exist before the restore
    pub deleted: usize,
    /// Files that could not be put back
    pub errors: usize,
    /// One message per error
    pub warnings: Vec<String>,
}

/// Result of permanently deleting an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Event id
    pub event_id: String,
    /// The log line was removed
    pub log_entry_removed: bool,
    /// The snapshot tree was removed
    pub snapshots_removed: bool,
    /// A cached summary was removed
    pub summary_removed: bool,
    /// An exported artifact was removed
    pub export_removed: bool,
    /// The id was removed from the trash set
    pub trash_entry_removed: bool,
    /// Failures of individual deletion steps
    pub errors: Vec<String>,
}

impl PurgeReport {
    /// Whether every step succeeded
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Options for line diffs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Unchanged lines shown around each change
    pub context_lines: usize,
    /// Compare lines with surrounding whitespace trimmed
    pub ignore_whitespace: bool,
    /// Files larger than this are not line-diffed (0 = no limit)
    pub max_file_size: u64,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            ignore_whitespace: false,
            max_file_size: 2 * 1024 * 1024,
        }
    }
}

/// One line of a diff hunk, with its 1-based line number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineChange {
    /// Present only in the new content
    Added(usize, String),
    /// Present only in the old content
    Deleted(usize, String),
    /// Unchanged line shown for context (old line number)
    Context(usize, String),
}

/// A contiguous group of changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    /// First old line (1-based, 0 when the old side is empty)
    pub from_line: usize,
    /// Old lines covered
    pub from_count: usize,
    /// First new line (1-based, 0 when the new side is empty)
    pub to_line: usize,
    /// New lines covered
    pub to_count: usize,
    /// Lines in order
    pub changes: Vec<LineChange>,
}

/// Line-level diff of one file between the before and after snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    /// Repo-relative path
    pub path: String,
    /// Classification from the event
    pub op: FileOp,
    /// Either side looked binary
    pub is_binary: bool,
    /// Either side exceeded the diff size limit
    pub too_large: bool,
    /// Hunks (empty for binary / too large / identical)
    pub hunks: Vec<DiffHunk>,
    /// Lines added
    pub lines_added: usize,
    /// Lines deleted
    pub lines_deleted: usize,
}

/// Configuration persisted in `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptLogConfig {
    /// Maximum events retained in the log (0 = unlimited)
    pub max_events: usize,
    /// Whether to emit the large-edit nudge
    pub nudge_enabled: bool,
    /// Changed lines that trigger the nudge
    pub nudge_threshold_lines: usize,
    /// Files larger than this are not snapshotted (0 = unlimited)
    pub max_file_size: u64,
    /// Extra glob patterns excluded from events
    pub ignore_patterns: Vec<String>,
    /// Version that wrote this configuration
    pub version: String,
}

impl Default for PromptLogConfig {
    fn default() -> Self {
        Self {
            max_events: 2000,
            nudge_enabled: true,
            nudge_threshold_lines: 20,
            max_file_size: 5 * 1024 * 1024,
            ignore_patterns: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Snapshot of the façade's state for status displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Session flag
    pub active: bool,
    /// Repository bound to the session
    pub repo_root: Option<PathBuf>,
    /// Pending checkpoint token
    pub checkpoint: Option<String>,
    /// Paths touched since the checkpoint
    pub touched_files: usize,
    /// Events in the log (including trashed)
    pub events: usize,
    /// Events in the trash
    pub trashed: usize,
    /// Bytes used by the storage directory
    pub storage_bytes: u64,
    /// An undo is available in this session
    pub undo_available: bool,
}

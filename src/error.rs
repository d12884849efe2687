//! Error types for the promptlog library
//!
//! Batch operations (building an event, restoring, undoing, purging) never
//! fail as a whole because of one file: per-file problems are reported in
//! their result structs. The variants here cover the conditions that abort
//! an operation before it mutates anything, plus the plumbing errors that
//! `?` propagates out of single-file helpers.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the promptlog library
pub type Result<T> = std::result::Result<T, PromptLogError>;

/// Main error type for all promptlog operations
#[derive(Debug, Error)]
pub enum PromptLogError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event not found in the log
    #[error("Event not found: {0}")]
    EventNotFound(String),

    /// An id prefix matched more than one event
    #[error("Ambiguous event id prefix '{prefix}' matches {count} events")]
    AmbiguousEventId {
        /// Prefix supplied by the caller
        prefix: String,
        /// Number of matching events
        count: usize,
    },

    /// Prompt text is required
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    /// No session has been started for this repository
    #[error("No active session")]
    NoActiveSession,

    /// A single-file restore named a path the event does not contain
    #[error("Event {event_id} does not contain {path}")]
    PathNotInEvent {
        /// Event that was searched
        event_id: String,
        /// Requested path
        path: String,
    },

    /// The backup phase of a restore failed; the working tree was not touched
    #[error("Backup failed for {path:?}: {reason}")]
    BackupFailed {
        /// File whose backup failed
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Undo was requested but no restore has happened in this session
    #[error("Nothing to undo")]
    NothingToUndo,

    /// A path escaped the directory it must stay inside
    #[error("Unsafe path: {0}")]
    UnsafePath(String),

    /// Storage is not initialized
    #[error("Storage not initialized at path: {0:?}")]
    StorageNotInitialized(PathBuf),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Pattern parsing error
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error")]
    WalkDir(#[from] walkdir::Error),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Version control subprocess failed
    #[error("Version control error: {0}")]
    VersionControl(String),

    /// Summarizer collaborator failed
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PromptLogError {
    /// Create a storage error with a custom message
    pub fn storage(msg: impl Into<String>) -> Self {
        PromptLogError::Storage(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        PromptLogError::Internal(msg.into())
    }

    /// Check if retrying the same operation later could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PromptLogError::BackupFailed { .. })
    }

    /// Check if this error is an informational abort rather than a failure
    pub fn is_user_abort(&self) -> bool {
        matches!(
            self,
            PromptLogError::EventNotFound(_)
                | PromptLogError::NothingToUndo
                | PromptLogError::EmptyPrompt
                | PromptLogError::NoActiveSession
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            PromptLogError::EventNotFound(id) => {
                format!("Event '{}' not found. Use 'list' to see recorded events.", id)
            }
            PromptLogError::NoActiveSession => {
                "No active session. Run 'start' first.".to_string()
            }
            PromptLogError::NothingToUndo => {
                "Nothing to undo: no restore has been performed in this session.".to_string()
            }
            PromptLogError::StorageNotInitialized(path) => {
                format!("Storage not initialized at {:?}. Run 'start' first.", path)
            }
            PromptLogError::BackupFailed { path, reason } => {
                format!(
                    "Could not back up {:?} ({}). Nothing was changed in the working tree.",
                    path, reason
                )
            }
            _ => self.to_string(),
        }
    }
}

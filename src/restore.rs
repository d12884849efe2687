//! Restore engine
//!
//! Applies one side of an event back onto the working tree. The working tree
//! is shared with the user, so every restore starts by backing up the files
//! it is about to touch:
//!
//! 1. **Backup**: every target that exists is copied to
//!    `backups/<restore-id>/files/` and `manifest.json` records which files
//!    existed along with their SHA-256. If anything in this phase fails the
//!    restore aborts and the working tree is untouched.
//! 2. **Apply**: each file is written from its snapshot or deleted, one by
//!    one. A failure on one file is reported and the rest continue.
//!
//! The returned [`UndoManifest`] replays the backup in one best-effort pass.

use crate::error::{PromptLogError, Result};
use crate::snapshot::SnapshotStore;
use crate::types::{
    DiffEntry, Event, FileRestoreOutcome, RestoreAction, RestoreOutcome, RestoreReport,
    RestoreScope, Side, UndoReport,
};
use crate::utils;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Name of the manifest file inside a backup directory
pub const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

/// State of one file before a restore touched it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Repo-relative path
    pub path: String,
    /// Whether the file existed
    pub existed: bool,
    /// Digest of the backed-up copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Everything needed to reverse one restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoManifest {
    /// Identifier of the restore (also the backup directory name)
    pub restore_id: String,
    /// Event that was restored
    pub event_id: String,
    /// Side that was applied
    pub side: Side,
    /// Creation time in milliseconds
    pub created_at: i64,
    /// Working tree the restore was applied to
    pub repo_root: PathBuf,
    /// One entry per target file, in restore order
    pub entries: Vec<BackupEntry>,
    #[serde(skip)]
    dir: PathBuf,
}

impl UndoManifest {
    /// Load a manifest from its backup directory
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PromptLogError::storage(format!("no undo manifest at {:?}", path)),
            _ => PromptLogError::Io(e),
        })?;
        let mut manifest: UndoManifest = serde_json::from_slice(&bytes)?;
        manifest.dir = dir.to_path_buf();
        Ok(manifest)
    }

    /// Backup directory holding the manifest and file copies
    pub fn backup_dir(&self) -> &Path {
        &self.dir
    }

    fn copy_path(&self, rel_path: &str) -> Result<PathBuf> {
        utils::safe_join(&self.dir.join(FILES_DIR), rel_path)
    }
}

/// Applies event snapshots to the working tree
#[derive(Debug, Clone)]
pub struct RestoreEngine {
    repo_root: PathBuf,
    snapshots: SnapshotStore,
    backups_dir: PathBuf,
}

impl RestoreEngine {
    /// Create an engine for `repo_root`, keeping backups in `backups_dir`
    pub fn new(repo_root: PathBuf, snapshots: SnapshotStore, backups_dir: PathBuf) -> Self {
        Self {
            repo_root,
            snapshots,
            backups_dir,
        }
    }

    /// Restore `side` of `event` for the files in `scope`
    ///
    /// Fails only before mutating anything: for a path outside the event or
    /// when the backup phase cannot complete.
    pub fn restore(
        &self,
        event: &Event,
        side: Side,
        scope: &RestoreScope,
    ) -> Result<(RestoreReport, UndoManifest)> {
        let start = Instant::now();
        let targets = select_targets(event, scope)?;
        info!(
            "Restoring {} side of event {} ({} files)",
            side,
            event.short_id(),
            targets.len()
        );

        let restore_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let manifest = match self.backup(&restore_id, event, side, &targets) {
            Ok(manifest) => manifest,
            Err(e) => {
                let dir = self.backups_dir.join(&restore_id);
                if let Err(cleanup) = utils::remove_dir_all_if_exists(&dir) {
                    warn!("Failed to clean up partial backup {:?}: {}", dir, cleanup);
                }
                return Err(e);
            }
        };

        let mut report = RestoreReport {
            event_id: event.id.clone(),
            side,
            restored: 0,
            deleted: 0,
            skipped: 0,
            errors: 0,
            outcomes: Vec::with_capacity(targets.len()),
            backup_dir: manifest.backup_dir().to_path_buf(),
            duration_ms: 0,
        };
        let mut emptied_dirs = BTreeSet::new();

        for entry in targets {
            let outcome = self.apply(event, entry, side);
            match &outcome {
                RestoreOutcome::Restored => report.restored += 1,
                RestoreOutcome::Deleted => {
                    report.deleted += 1;
                    if let Some(parent) = Path::new(&entry.path).parent() {
                        emptied_dirs.insert(parent.to_path_buf());
                    }
                }
                RestoreOutcome::Skipped(reason) => {
                    debug!("Skipped {}: {}", entry.path, reason);
                    report.skipped += 1;
                }
                RestoreOutcome::Error(reason) => {
                    warn!("Failed to restore {}: {}", entry.path, reason);
                    report.errors += 1;
                }
            }
            report.outcomes.push(FileRestoreOutcome {
                path: entry.path.clone(),
                outcome,
            });
        }

        self.remove_emptied_dirs(emptied_dirs);
        report.duration_ms = start.elapsed().as_millis() as u64;
        info!("Restore finished: {}", report.summary());
        Ok((report, manifest))
    }

    fn backup(
        &self,
        restore_id: &str,
        event: &Event,
        side: Side,
        targets: &[&DiffEntry],
    ) -> Result<UndoManifest> {
        let dir = self.backups_dir.join(restore_id);
        let files_dir = dir.join(FILES_DIR);
        fs::create_dir_all(&files_dir).map_err(|e| backup_failed(&files_dir, e))?;

        let mut entries = Vec::with_capacity(targets.len());
        for entry in targets {
            let Ok(disk) = utils::contained_join(&self.repo_root, &entry.path) else {
                // Never mutated, so nothing to back up
                continue;
            };
            let meta = match fs::symlink_metadata(&disk) {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    entries.push(BackupEntry { path: entry.path.clone(), existed: false, sha256: None });
                    continue;
                }
                Err(e) => return Err(backup_failed(&disk, e)),
            };
            if meta.is_dir() {
                // Writing or deleting a file here fails without changing anything
                continue;
            }

            let content = fs::read(&disk).map_err(|e| backup_failed(&disk, e))?;
            let copy = files_dir.join(&entry.path);
            utils::write_creating_parents(&copy, &content).map_err(|e| backup_failed(&disk, e))?;
            trace!("Backed up {} ({} bytes)", entry.path, content.len());
            entries.push(BackupEntry {
                path: entry.path.clone(),
                existed: true,
                sha256: Some(utils::hash_data(&content)),
            });
        }

        let manifest = UndoManifest {
            restore_id: restore_id.to_string(),
            event_id: event.id.clone(),
            side,
            created_at: utils::now_ms(),
            repo_root: self.repo_root.clone(),
            entries,
            dir: dir.clone(),
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest)?;
        utils::atomic_write(&manifest_path, &json).map_err(|e| backup_failed(&manifest_path, e))?;
        debug!("Backup of {} files written to {:?}", manifest.entries.len(), dir);
        Ok(manifest)
    }

    fn apply(&self, event: &Event, entry: &DiffEntry, side: Side) -> RestoreOutcome {
        let disk = match utils::contained_join(&self.repo_root, &entry.path) {
            Ok(disk) => disk,
            Err(_) => return RestoreOutcome::Skipped("path escapes the repository".to_string()),
        };

        match RestoreAction::plan(entry.op, side) {
            RestoreAction::Delete => match utils::remove_file_if_exists(&disk) {
                Ok(_) => {
                    trace!("Deleted {}", entry.path);
                    RestoreOutcome::Deleted
                }
                Err(e) => RestoreOutcome::Error(e.to_string()),
            },
            RestoreAction::Write => {
                let Some(handle) = entry.handle(side) else {
                    return RestoreOutcome::Skipped(format!("no {} snapshot", side));
                };
                let Some(content) = self.snapshots.read(handle, &event.id) else {
                    return RestoreOutcome::Skipped(format!("{} snapshot unavailable", side));
                };
                match write_file(&disk, &content) {
                    Ok(()) => {
                        trace!("Restored {} ({} bytes)", entry.path, content.len());
                        RestoreOutcome::Restored
                    }
                    Err(e) => RestoreOutcome::Error(e.to_string()),
                }
            }
        }
    }

    fn remove_emptied_dirs(&self, dirs: BTreeSet<PathBuf>) {
        let mut candidates = BTreeSet::new();
        for dir in dirs {
            let mut current = dir.as_path();
            while !current.as_os_str().is_empty() {
                candidates.insert(current.to_path_buf());
                current = match current.parent() {
                    Some(parent) => parent,
                    None => break,
                };
            }
        }

        // Deepest first
        let mut ordered: Vec<PathBuf> = candidates.into_iter().collect();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for rel in ordered {
            let dir = self.repo_root.join(&rel);
            if let Err(e) = utils::remove_dir_if_empty(&dir) {
                trace!("Could not remove directory {:?}: {}", dir, e);
            }
        }
    }

    /// Replay an undo manifest: put back backed-up files, delete created ones
    pub fn undo(&self, manifest: &UndoManifest) -> UndoReport {
        info!(
            "Undoing restore {} of event {}",
            manifest.restore_id,
            utils::short_id(&manifest.event_id)
        );
        let mut report = UndoReport::default();

        for entry in &manifest.entries {
            match self.undo_entry(manifest, entry) {
                Ok(true) => report.restored += 1,
                Ok(false) => report.deleted += 1,
                Err(e) => {
                    warn!("Undo failed for {}: {}", entry.path, e);
                    report.errors += 1;
                    report.warnings.push(format!("{}: {}", entry.path, e));
                }
            }
        }

        info!(
            "Undo finished: {} restored, {} deleted, {} errors",
            report.restored, report.deleted, report.errors
        );
        report
    }

    fn undo_entry(&self, manifest: &UndoManifest, entry: &BackupEntry) -> Result<bool> {
        let disk = utils::contained_join(&self.repo_root, &entry.path)?;
        if !entry.existed {
            utils::remove_file_if_exists(&disk)?;
            return Ok(false);
        }

        let content = fs::read(manifest.copy_path(&entry.path)?)?;
        if let Some(expected) = &entry.sha256 {
            if &utils::hash_data(&content) != expected {
                return Err(PromptLogError::storage("backup copy does not match its recorded digest"));
            }
        }
        write_file(&disk, &content)?;
        Ok(true)
    }
}

fn select_targets<'a>(event: &'a Event, scope: &RestoreScope) -> Result<Vec<&'a DiffEntry>> {
    match scope {
        RestoreScope::All => Ok(event.diff_uris.iter().collect()),
        RestoreScope::Path(path) => {
            let path = utils::normalize_rel_path(path);
            event
                .entry(&path)
                .map(|entry| vec![entry])
                .ok_or_else(|| PromptLogError::PathNotInEvent {
                    event_id: event.id.clone(),
                    path,
                })
        }
    }
}

/// Write through a fresh file, replacing a symlink instead of following it
fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            fs::remove_file(path)?;
        }
    }
    utils::write_creating_parents(path, content)
}

fn backup_failed(path: &Path, e: impl std::fmt::Display) -> PromptLogError {
    PromptLogError::BackupFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

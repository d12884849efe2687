//! Main PromptLog implementation
//!
//! This module provides the [`PromptLog`] façade, the single entry point the
//! presentation layer (the CLI, an editor integration) talks to. It
//! coordinates the subsystems:
//!
//! - **Diff source**: reports working-tree changes and historical content
//! - **Event builder**: snapshots changes into a new event
//! - **Event store**: the append-only log plus trash and artifact caches
//! - **Restore engine**: backup-then-apply restores and undo
//! - **Session**: checkpoint, touched files, nudge, last undo manifest
//!
//! ## Thread Safety
//!
//! Every operation takes `&self`. Session state sits behind a mutex so a
//! watcher thread can record edits while other operations run. Mutations of
//! storage hold the storage lock, and operations on one event additionally
//! hold that event's lock, so concurrent invocations serialize.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use promptlog::{PromptLog, BuildOutcome, RestoreScope, Side};
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let log = PromptLog::init(PathBuf::from("./project"), PathBuf::from("./project/.promptlog"))?;
//! log.start_session()?;
//! log.create_checkpoint()?;
//! log.record_edit("src/main.rs", 3);
//!
//! if let BuildOutcome::Logged(report) = log.log_prompt("Refactor main", None, vec![])? {
//!     log.restore(&report.event.id, Side::Before, RestoreScope::All)?;
//!     log.undo_last_restore()?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::builder::{ignore_set, BuildRequest, EventBuilder};
use crate::diff::{changed_line_count, create_file_diff};
use crate::error::{PromptLogError, Result};
use crate::export::render_markdown;
use crate::lock::{EventLocks, StorageLock};
use crate::restore::{RestoreEngine, UndoManifest, MANIFEST_FILE};
use crate::session::{JsonFileStore, KeyValueStore, Nudge, NudgeSettings, SessionHandle};
use crate::snapshot::SnapshotStore;
use crate::source::{self, DiffSource};
use crate::store::EventStore;
use crate::summary::{Summarizer, SummaryInput};
use crate::types::*;
use crate::utils;
use crate::watcher::{EditSink, EditWatcher};
use globset::GlobSet;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const CONFIG_FILE: &str = "config.json";
const SESSION_FILE: &str = "session.json";
const SNAPSHOTS_DIR: &str = "snapshots";
const BACKUPS_DIR: &str = "backups";
const BASELINE_DIR: &str = "baseline";

/// Main PromptLog struct
///
/// Owns the storage directory of one repository and exposes the operations
/// of the presentation boundary.
pub struct PromptLog {
    repo_root: PathBuf,
    storage_path: PathBuf,
    config: PromptLogConfig,
    source: Arc<dyn DiffSource>,
    ignore: GlobSet,
    store: EventStore,
    builder: EventBuilder,
    restorer: RestoreEngine,
    session: Mutex<SessionHandle>,
    event_locks: EventLocks,
    diff_options: DiffOptions,
}

impl std::fmt::Debug for PromptLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptLog")
            .field("repo_root", &self.repo_root)
            .field("storage_path", &self.storage_path)
            .field("source", &self.source.name())
            .field("config", &self.config)
            .finish()
    }
}

impl PromptLog {
    /// Initialize (or reopen) storage for a repository with default settings
    #[instrument]
    pub fn init(root_path: PathBuf, storage_path: PathBuf) -> Result<Self> {
        PromptLogBuilder::new().build(root_path, storage_path)
    }

    /// Open existing storage; fails if it was never initialized
    #[instrument]
    pub fn open(root_path: PathBuf, storage_path: PathBuf) -> Result<Self> {
        if !storage_path.join(CONFIG_FILE).exists() {
            return Err(PromptLogError::StorageNotInitialized(storage_path));
        }
        PromptLogBuilder::new().build(root_path, storage_path)
    }

    /// Root of the working tree
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Storage directory
    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Effective configuration
    pub fn config(&self) -> &PromptLogConfig {
        &self.config
    }

    /// Name of the active diff source
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Activate the session for this repository
    #[instrument(skip(self))]
    pub fn start_session(&self) -> Result<()> {
        self.session.lock().start(self.repo_root.clone())
    }

    /// Deactivate the session
    #[instrument(skip(self))]
    pub fn end_session(&self) -> Result<()> {
        self.session.lock().end()
    }

    /// Pin a checkpoint; returns its reference
    ///
    /// Uses the source's revision, or a synthetic `:working:<ms>` token
    /// when there is none.
    #[instrument(skip(self))]
    pub fn create_checkpoint(&self) -> Result<String> {
        if !self.session.lock().session().active {
            return Err(PromptLogError::NoActiveSession);
        }
        let _storage = StorageLock::acquire(&self.storage_path)?;
        let token = self
            .source
            .pin_checkpoint()
            .unwrap_or_else(|| format!("{}{}", WORKING_REF_PREFIX, utils::now_ms()));
        self.session.lock().create_checkpoint(token.clone())?;
        Ok(token)
    }

    /// Note an edit reported by the editor
    ///
    /// `path` may be absolute (inside the repository) or repo-relative.
    pub fn record_edit(&self, path: &str, changed_lines: usize) -> Option<Nudge> {
        let rel = self.tracked_rel_path(path)?;
        self.session.lock().record_edit(&rel, changed_lines)
    }

    /// Note an edit of a file, counting its changed lines
    ///
    /// Lines are counted against the pending checkpoint, or the source's
    /// current revision when there is none.
    pub fn record_file_edit(&self, path: &str) -> Option<Nudge> {
        let rel = self.tracked_rel_path(path)?;
        let current = fs::read(self.repo_root.join(&rel)).unwrap_or_default();
        let previous = self.reference_content_of(&rel).unwrap_or_default();
        let lines = changed_line_count(&previous, &current);
        self.session.lock().record_edit(&rel, lines)
    }

    fn tracked_rel_path(&self, path: &str) -> Option<String> {
        let candidate = Path::new(path);
        let rel = if candidate.is_absolute() {
            match utils::make_relative(candidate, &self.repo_root) {
                Ok(rel) => utils::path_to_rel_string(&rel),
                Err(_) => {
                    debug!("Ignoring edit outside the repository: {}", path);
                    return None;
                }
            }
        } else {
            utils::normalize_rel_path(path)
        };
        if rel.is_empty() || self.ignore.is_match(&rel) {
            return None;
        }
        Some(rel)
    }

    fn reference_content_of(&self, rel_path: &str) -> Option<Vec<u8>> {
        let checkpoint = self.session.lock().session().last_checkpoint.clone();
        let reference = checkpoint.or_else(|| self.source.current_revision())?;
        self.source.content_at_ref(&reference, rel_path)
    }

    /// Build and persist an event for the current changes
    ///
    /// With a pending checkpoint only touched files are included. Returns
    /// [`BuildOutcome::NothingToLog`] without changing any state when there
    /// is nothing to record.
    #[instrument(skip(self, response_preview))]
    pub fn log_prompt(
        &self,
        prompt: &str,
        response_preview: Option<String>,
        tags: Vec<String>,
    ) -> Result<BuildOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PromptLogError::EmptyPrompt);
        }
        let _storage = StorageLock::acquire(&self.storage_path)?;

        let request = {
            let session = self.session.lock();
            BuildRequest {
                prompt: prompt.to_string(),
                response_preview: response_preview.filter(|r| !r.trim().is_empty()),
                tags: tags
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
                checkpoint: session.session().last_checkpoint.clone(),
                touched: session.touched().snapshot(),
            }
        };

        let mut report = match self.builder.build(&request)? {
            BuildOutcome::NothingToLog => {
                info!("Nothing to log");
                return Ok(BuildOutcome::NothingToLog);
            }
            BuildOutcome::Logged(report) => report,
        };

        let event_id = report.event.id.clone();
        let appended = self
            .event_locks
            .with_lock(&event_id, || self.store.append(&report.event, self.config.max_events));
        let trimmed = match appended {
            Ok(trimmed) => trimmed,
            Err(e) => {
                if let Err(cleanup) = self.store.snapshots().remove_event(&event_id) {
                    warn!("Failed to remove snapshots of unlogged event {}: {}", event_id, cleanup);
                }
                return Err(e);
            }
        };
        for id in &trimmed {
            self.event_locks.forget(id);
        }
        report.trimmed = trimmed;

        self.session.lock().finish_log()?;
        info!(
            "Logged event {} ({} files)",
            report.event.short_id(),
            report.event.files_changed.len()
        );
        Ok(BuildOutcome::Logged(report))
    }

    /// Resolve a full id or unique prefix
    pub fn resolve_id(&self, id: &str) -> Result<String> {
        self.store.resolve_id(id)
    }

    /// Events in `mode`, newest first
    pub fn list_events(&self, mode: ListMode) -> Result<Vec<Event>> {
        self.store.list(mode)
    }

    /// Look up one event by id or unique prefix
    pub fn get_event(&self, id: &str) -> Result<Event> {
        self.store.get(&self.store.resolve_id(id)?)
    }

    /// Case-insensitive search over prompt, paths and tags
    pub fn search(&self, query: &str, mode: ListMode) -> Result<Vec<Event>> {
        self.store.search(query, mode)
    }

    fn file_diff(&self, event: &Event, entry: &DiffEntry) -> FileDiff {
        let read = |side: Side| {
            entry
                .handle(side)
                .and_then(|h| self.store.snapshots().read(h, &event.id))
                .unwrap_or_default()
        };
        create_file_diff(
            &entry.path,
            entry.op,
            &read(Side::Before),
            &read(Side::After),
            &self.diff_options,
        )
    }

    fn event_diffs(&self, event: &Event) -> Vec<FileDiff> {
        event.diff_uris.iter().map(|entry| self.file_diff(event, entry)).collect()
    }

    /// Line diff of one file between its before and after snapshots
    pub fn event_diff(&self, id: &str, path: &str) -> Result<FileDiff> {
        let event = self.get_event(id)?;
        let path = utils::normalize_rel_path(path);
        let entry = event.entry(&path).ok_or_else(|| PromptLogError::PathNotInEvent {
            event_id: event.id.clone(),
            path: path.clone(),
        })?;
        Ok(self.file_diff(&event, entry))
    }

    /// Summarize an event, reusing the cached summary when there is one
    #[instrument(skip(self, summarizer))]
    pub fn summarize(&self, id: &str, summarizer: &dyn Summarizer) -> Result<String> {
        let event = self.get_event(id)?;
        if let Some(cached) = self.store.read_summary(&event.id) {
            debug!("Using cached summary for {}", event.short_id());
            return Ok(cached);
        }

        let diffs = self.event_diffs(&event);
        let summary = summarizer.summarize(&SummaryInput { event: &event, diffs: &diffs })?;
        if let Err(e) = self.store.write_summary(&event.id, &summary) {
            warn!("Failed to cache summary for {}: {}", event.short_id(), e);
        }
        Ok(summary)
    }

    /// Cached summary of an event, if any
    pub fn cached_summary(&self, id: &str) -> Result<Option<String>> {
        let id = self.store.resolve_id(id)?;
        Ok(self.store.read_summary(&id))
    }

    /// Move an event to the trash; returns whether it changed
    #[instrument(skip(self))]
    pub fn trash(&self, id: &str) -> Result<bool> {
        let id = self.store.resolve_id(id)?;
        let _storage = StorageLock::acquire(&self.storage_path)?;
        self.store.trash(&id)
    }

    /// Take an event out of the trash; returns whether it changed
    #[instrument(skip(self))]
    pub fn untrash(&self, id: &str) -> Result<bool> {
        let id = self.store.resolve_id(id)?;
        let _storage = StorageLock::acquire(&self.storage_path)?;
        self.store.untrash(&id)
    }

    /// Permanently delete an event and its artifacts
    #[instrument(skip(self))]
    pub fn purge(&self, id: &str) -> Result<PurgeReport> {
        let id = self.store.resolve_id(id)?;
        let _storage = StorageLock::acquire(&self.storage_path)?;
        let report = self.event_locks.with_lock(&id, || self.store.purge(&id))?;
        self.event_locks.forget(&id);
        Ok(report)
    }

    /// Restore one side of an event onto the working tree
    ///
    /// The manifest of this restore replaces any previous one as the target
    /// of [`PromptLog::undo_last_restore`].
    #[instrument(skip(self))]
    pub fn restore(&self, id: &str, side: Side, scope: RestoreScope) -> Result<RestoreReport> {
        let id = self.store.resolve_id(id)?;
        let _storage = StorageLock::acquire(&self.storage_path)?;
        let (report, manifest) = self.event_locks.with_lock(&id, || {
            let event = self.store.get(&id)?;
            self.restorer.restore(&event, side, &scope)
        })?;
        self.session.lock().set_last_restore(manifest);
        Ok(report)
    }

    /// Undo the last restore of this session
    #[instrument(skip(self))]
    pub fn undo_last_restore(&self) -> Result<UndoReport> {
        let manifest = self
            .session
            .lock()
            .take_last_restore()
            .ok_or(PromptLogError::NothingToUndo)?;
        self.undo_manifest(&manifest)
    }

    /// Undo the restore whose backup lives in `backup_dir`
    #[instrument(skip(self))]
    pub fn undo_from(&self, backup_dir: &Path) -> Result<UndoReport> {
        let manifest = UndoManifest::load(backup_dir)?;
        {
            let mut session = self.session.lock();
            let pending_matches = session
                .take_last_restore()
                .map(|last| last.restore_id == manifest.restore_id);
            if pending_matches == Some(false) {
                warn!("Undoing an older restore; the latest one stays undoable only from its backup directory");
            }
        }
        self.undo_manifest(&manifest)
    }

    /// Backup directory of the most recent restore on disk, if any
    ///
    /// Restore ids start with a timestamp, so the greatest name is the newest.
    pub fn latest_backup(&self) -> Result<Option<PathBuf>> {
        let backups = self.storage_path.join(BACKUPS_DIR);
        if !backups.is_dir() {
            return Ok(None);
        }
        let mut latest: Option<PathBuf> = None;
        for entry in fs::read_dir(&backups)? {
            let path = entry?.path();
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            match &latest {
                Some(current) if current.file_name() >= path.file_name() => {}
                _ => latest = Some(path),
            }
        }
        Ok(latest)
    }

    fn undo_manifest(&self, manifest: &UndoManifest) -> Result<UndoReport> {
        let _storage = StorageLock::acquire(&self.storage_path)?;
        Ok(self
            .event_locks
            .with_lock(&manifest.event_id, || self.restorer.undo(manifest)))
    }

    /// Write a Markdown export of an event; returns its path
    #[instrument(skip(self))]
    pub fn export_markdown(&self, id: &str) -> Result<PathBuf> {
        let event = self.get_event(id)?;
        let document = render_markdown(&event, &self.event_diffs(&event));
        let path = self.store.write_export(&event.id, &document)?;
        info!("Exported event {} to {:?}", event.short_id(), path);
        Ok(path)
    }

    /// Start a watcher feeding edits into this session
    ///
    /// `on_nudge` runs on the watcher thread whenever an edit crosses the
    /// nudge threshold.
    pub fn watch(self: &Arc<Self>, on_nudge: impl Fn(Nudge) + Send + 'static) -> Result<EditWatcher> {
        let sink: Arc<dyn EditSink> = self.clone();
        EditWatcher::start(&self.repo_root, self.ignore.clone(), sink, Box::new(on_nudge))
    }

    /// Current state for status displays
    pub fn status(&self) -> Result<StatusInfo> {
        let events = self.store.read_all()?;
        let trash = self.store.trashed_ids();
        let trashed = events.iter().filter(|e| trash.contains(&e.id)).count();
        let session = self.session.lock();
        Ok(StatusInfo {
            active: session.session().active,
            repo_root: session.session().repo_root.clone(),
            checkpoint: session.session().last_checkpoint.clone(),
            touched_files: session.touched().len(),
            events: events.len(),
            trashed,
            storage_bytes: utils::dir_size(&self.storage_path),
            undo_available: session.has_undo(),
        })
    }
}

impl EditSink for PromptLog {
    fn record_edit(&self, path: &str, changed_lines: usize) -> Option<Nudge> {
        PromptLog::record_edit(self, path, changed_lines)
    }

    fn reference_content(&self, path: &str) -> Option<Vec<u8>> {
        self.reference_content_of(path)
    }
}

/// Builder for configuring PromptLog instances
///
/// # Examples
///
/// ```rust,no_run
/// use promptlog::PromptLogBuilder;
/// use std::path::PathBuf;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let log = PromptLogBuilder::new()
///     .max_events(500)
///     .ignore_patterns(vec!["target/**".to_string()])
///     .build(PathBuf::from("./project"), PathBuf::from("./project/.promptlog"))?;
/// # Ok(())
/// # }
/// ```
pub struct PromptLogBuilder {
    config: PromptLogConfig,
    source: Option<Arc<dyn DiffSource>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
}

impl PromptLogBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: PromptLogConfig::default(),
            source: None,
            kv_store: None,
        }
    }

    /// Maximum events kept in the log (0 = unlimited)
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.config.max_events = max_events;
        self
    }

    /// Enable or disable the large-edit nudge
    pub fn nudge_enabled(mut self, enabled: bool) -> Self {
        self.config.nudge_enabled = enabled;
        self
    }

    /// Changed lines that trigger the nudge
    pub fn nudge_threshold_lines(mut self, lines: usize) -> Self {
        self.config.nudge_threshold_lines = lines;
        self
    }

    /// Files larger than this are not snapshotted (0 = unlimited)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Extra glob patterns to leave out of events
    ///
    /// `.git` and the storage directory are always ignored.
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.ignore_patterns = patterns;
        self
    }

    /// Use a specific diff source instead of detecting one
    pub fn source(mut self, source: Arc<dyn DiffSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Keep the session record in a host-provided store
    pub fn kv_store(mut self, kv_store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(kv_store);
        self
    }

    /// Build the instance
    ///
    /// An existing `config.json` in `storage_path` wins over the builder's
    /// settings; otherwise the builder's settings are written there.
    pub fn build(self, root_path: PathBuf, storage_path: PathBuf) -> Result<PromptLog> {
        if !root_path.is_dir() {
            return Err(PromptLogError::InvalidConfiguration(format!(
                "Root path {:?} is not a directory",
                root_path
            )));
        }
        fs::create_dir_all(&storage_path)?;

        let config_path = storage_path.join(CONFIG_FILE);
        let config = if config_path.exists() {
            debug!("Loading configuration from {:?}", config_path);
            serde_json::from_slice::<PromptLogConfig>(&fs::read(&config_path)?)?
        } else {
            info!("Initializing storage at {:?}", storage_path);
            utils::atomic_write(&config_path, &serde_json::to_vec_pretty(&self.config)?)?;
            self.config
        };

        let storage_rel = |root: &Path| {
            utils::make_relative(&storage_path, root)
                .ok()
                .map(|rel| utils::path_to_rel_string(&rel))
        };

        let source = match self.source {
            Some(source) => source,
            None => {
                let ignore = ignore_set(&config.ignore_patterns, storage_rel(&root_path).as_deref())?;
                Arc::from(source::detect(
                    &root_path,
                    storage_path.join(BASELINE_DIR),
                    ignore,
                    config.max_file_size,
                ))
            }
        };
        let repo_root = source
            .repo_root()
            .map(Path::to_path_buf)
            .unwrap_or(root_path);
        let ignore = ignore_set(&config.ignore_patterns, storage_rel(&repo_root).as_deref())?;

        let snapshots = SnapshotStore::new(storage_path.join(SNAPSHOTS_DIR));
        let store = EventStore::new(storage_path.clone(), snapshots.clone());
        let builder = EventBuilder::new(source.clone(), snapshots.clone(), ignore.clone())
            .with_max_file_size(config.max_file_size);
        let restorer = RestoreEngine::new(repo_root.clone(), snapshots, storage_path.join(BACKUPS_DIR));

        let kv = self
            .kv_store
            .unwrap_or_else(|| Arc::new(JsonFileStore::new(storage_path.join(SESSION_FILE))));
        let session = SessionHandle::load(
            kv,
            NudgeSettings {
                enabled: config.nudge_enabled,
                threshold_lines: config.nudge_threshold_lines,
            },
        )?;

        debug!("Using {} source rooted at {:?}", source.name(), repo_root);
        Ok(PromptLog {
            repo_root,
            storage_path,
            config,
            source,
            ignore,
            store,
            builder,
            restorer,
            session: Mutex::new(session),
            event_locks: EventLocks::default(),
            diff_options: DiffOptions::default(),
        })
    }
}

impl Default for PromptLogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Event builder
//!
//! Turns the working-tree changes reported by a [`DiffSource`] into an
//! [`Event`] whose before/after content lives in the snapshot store.
//!
//! ## Build steps
//!
//! 1. Ask the source for current changes and normalize their paths
//! 2. With a checkpoint, keep only paths in the touched set
//! 3. Abort with [`BuildOutcome::NothingToLog`] when nothing is left; no
//!    directory is created in that case
//! 4. Snapshot every file in parallel: the before side first, then the
//!    after side and the classification
//! 5. Assemble the event with handles pointing into the snapshot tree
//!
//! Per-file snapshot failures do not abort the build. They are recorded as
//! [`SnapshotStatus::Failed`] and the side is left without a handle.

use crate::error::Result;
use crate::snapshot::SnapshotStore;
use crate::source::{DiffSource, RefContent, WorkingChange};
use crate::types::{
    BuildOutcome, BuildReport, DiffEntry, Event, FileOp, FileSnapshotOutcome, Side,
    SnapshotStatus, AFTER_REF_WORKING,
};
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Build the ignore matcher for a repository
///
/// `.git` and the storage directory (when it lives inside the repository)
/// are always ignored.
pub fn ignore_set(patterns: &[String], storage_rel: Option<&str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(".git")?);
    builder.add(Glob::new(".git/**")?);
    if let Some(storage) = storage_rel.filter(|s| !s.is_empty()) {
        builder.add(Glob::new(storage)?);
        builder.add(Glob::new(&format!("{}/**", storage))?);
    }
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Inputs of one build
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Prompt text (already validated as non-empty)
    pub prompt: String,
    /// Optional response text
    pub response_preview: Option<String>,
    /// Labels
    pub tags: Vec<String>,
    /// Pending checkpoint reference
    pub checkpoint: Option<String>,
    /// Paths edited since the checkpoint
    pub touched: BTreeSet<String>,
}

/// Builds events from working-tree changes
pub struct EventBuilder {
    source: Arc<dyn DiffSource>,
    snapshots: SnapshotStore,
    ignore: GlobSet,
    max_file_size: u64,
}

impl EventBuilder {
    /// Create a builder
    pub fn new(source: Arc<dyn DiffSource>, snapshots: SnapshotStore, ignore: GlobSet) -> Self {
        Self {
            source,
            snapshots,
            ignore,
            max_file_size: 0,
        }
    }

    /// Files larger than this get a failed after snapshot (0 = no limit)
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Changes eligible for an event, normalized, filtered and sorted by path
    pub fn collect_targets(&self, request: &BuildRequest) -> Vec<WorkingChange> {
        let mut targets: BTreeMap<String, WorkingChange> = BTreeMap::new();
        for mut change in self.source.current_changes() {
            let path = utils::normalize_rel_path(&change.path);
            if !utils::is_safe_relative(&path) {
                warn!("Ignoring change with unsafe path {:?}", change.path);
                continue;
            }
            if self.ignore.is_match(&path) {
                trace!("Ignoring {}", path);
                continue;
            }
            change.path = path;
            targets.entry(change.path.clone()).or_insert(change);
        }

        if request.checkpoint.is_some() {
            let touched: BTreeSet<String> = request
                .touched
                .iter()
                .map(|p| utils::normalize_rel_path(p))
                .collect();
            targets.retain(|path, _| touched.contains(path));
        }

        targets.into_values().collect()
    }

    /// Build an event without persisting it
    ///
    /// Snapshots are written under a fresh event id. The caller appends the
    /// returned event to the store.
    pub fn build(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        let Some(repo_root) = self.source.repo_root().map(Path::to_path_buf) else {
            debug!("No working tree open");
            return Ok(BuildOutcome::NothingToLog);
        };

        let targets = self.collect_targets(request);
        if targets.is_empty() {
            debug!(
                "Nothing to log (checkpoint: {:?}, touched: {})",
                request.checkpoint,
                request.touched.len()
            );
            return Ok(BuildOutcome::NothingToLog);
        }

        let id = Uuid::new_v4().to_string();
        self.snapshots.prepare(&id)?;
        info!("Building event {} with {} files", utils::short_id(&id), targets.len());

        let checkpoint = request.checkpoint.as_deref();
        let results: Vec<(DiffEntry, FileSnapshotOutcome)> = targets
            .par_iter()
            .map(|change| self.snapshot_file(&id, &repo_root, change, checkpoint))
            .collect();

        let (diff_uris, files): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        let event = Event {
            id,
            timestamp: utils::now_ms(),
            prompt: request.prompt.clone(),
            response_preview: request.response_preview.clone(),
            repo_root,
            before_ref: request.checkpoint.clone(),
            after_ref: AFTER_REF_WORKING.to_string(),
            files_changed: diff_uris.iter().map(|e| e.path.clone()).collect(),
            diff_uris,
            tags: request.tags.clone(),
        };

        let report = BuildReport { event, files, trimmed: Vec::new() };
        for warning in report.warnings() {
            warn!("{}", warning);
        }
        Ok(BuildOutcome::Logged(report))
    }

    fn snapshot_file(
        &self,
        event_id: &str,
        repo_root: &Path,
        change: &WorkingChange,
        checkpoint: Option<&str>,
    ) -> (DiffEntry, FileSnapshotOutcome) {
        let path = change.path.as_str();

        // Without a checkpoint the source's own left reference still gives
        // the diff something to show; the file is classified as added anyway.
        let before_lookup = match (checkpoint, change.left.as_deref()) {
            (Some(reference), _) | (None, Some(reference)) => self.source.lookup_at_ref(reference, path),
            (None, None) => RefContent::Absent,
        };
        let existed_at_checkpoint = checkpoint.is_some() && before_lookup.existed();
        let (left, before) = match before_lookup {
            RefContent::Present(content) => self.write_side(event_id, Side::Before, path, Some(content)),
            RefContent::Absent => self.write_side(event_id, Side::Before, path, None),
            RefContent::Unavailable(reason) => (None, SnapshotStatus::Failed(reason)),
        };

        let disk_path = repo_root.join(path);
        let exists_now = fs::symlink_metadata(&disk_path).is_ok();
        let after_content = if exists_now {
            self.read_current(&disk_path)
        } else {
            Ok(None)
        };
        let (right, after) = match after_content {
            Ok(content) => self.write_side(event_id, Side::After, path, content),
            Err(reason) => (None, SnapshotStatus::Failed(reason)),
        };

        let op = FileOp::classify(exists_now, checkpoint.is_some(), existed_at_checkpoint);
        trace!("{} {} (before: {:?}, after: {:?})", op, path, before, after);

        (
            DiffEntry { path: path.to_string(), left, right, op },
            FileSnapshotOutcome { path: path.to_string(), op, before, after },
        )
    }

    fn read_current(&self, disk_path: &Path) -> std::result::Result<Option<Vec<u8>>, String> {
        let meta = fs::metadata(disk_path).map_err(|e| e.to_string())?;
        if !meta.is_file() {
            return Err("not a regular file".to_string());
        }
        if self.max_file_size > 0 && meta.len() > self.max_file_size {
            return Err(format!(
                "{} exceeds the {} snapshot limit",
                utils::format_bytes(meta.len()),
                utils::format_bytes(self.max_file_size)
            ));
        }
        fs::read(disk_path).map(Some).map_err(|e| e.to_string())
    }

    fn write_side(
        &self,
        event_id: &str,
        side: Side,
        path: &str,
        content: Option<Vec<u8>>,
    ) -> (Option<crate::snapshot::SnapshotHandle>, SnapshotStatus) {
        let bytes = content.as_deref().unwrap_or_default();
        match self.snapshots.write(event_id, side, path, bytes) {
            Ok(handle) => {
                let status = match content {
                    Some(c) => SnapshotStatus::Written { bytes: c.len() as u64 },
                    None => SnapshotStatus::Placeholder,
                };
                (Some(handle), status)
            }
            Err(e) => (None, SnapshotStatus::Failed(e.to_string())),
        }
    }
}

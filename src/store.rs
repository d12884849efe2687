//! Event store
//!
//! The event log (`events.jsonl`) holds one JSON event per line and is the
//! only authority on which events exist. Everything else is derived:
//!
//! - `trash.json`: ids hidden from the default listing
//! - `snapshots/<id>/`: content captured by the builder
//! - `summaries/<id>.md`, `exports/<id>.md`: cached artifacts
//!
//! Reads are lenient. A line that does not parse (for example a torn last
//! write) is skipped with a warning and the rest of the log stays readable.

use crate::error::{PromptLogError, Result};
use crate::snapshot::{is_valid_event_id, SnapshotStore};
use crate::types::{Event, ListMode, PurgeReport};
use crate::utils;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

const EVENTS_FILE: &str = "events.jsonl";
const TRASH_FILE: &str = "trash.json";
const SUMMARIES_DIR: &str = "summaries";
const EXPORTS_DIR: &str = "exports";

#[derive(Deserialize)]
struct LineId {
    id: String,
}

fn line_id(line: &str) -> Option<String> {
    serde_json::from_str::<LineId>(line).ok().map(|l| l.id)
}

/// Append-only event log with trash, purge and artifact caches
#[derive(Debug, Clone)]
pub struct EventStore {
    dir: PathBuf,
    snapshots: SnapshotStore,
}

impl EventStore {
    /// Open the store in a storage directory
    pub fn new(dir: PathBuf, snapshots: SnapshotStore) -> Self {
        Self { dir, snapshots }
    }

    /// Path of the event log
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    fn trash_path(&self) -> PathBuf {
        self.dir.join(TRASH_FILE)
    }

    /// Snapshot store the events refer to
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Append an event, then trim the log to `max_retained` lines (0 = no limit)
    ///
    /// Returns the ids of trimmed events, oldest first. Their snapshot trees,
    /// summaries, exports and trash entries are removed best-effort.
    pub fn append(&self, event: &Event, max_retained: usize) -> Result<Vec<String>> {
        let line = serde_json::to_string(event)?;
        let path = self.log_path();
        fs::create_dir_all(&self.dir)?;

        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        if ends_without_newline(&mut file)? {
            debug!("Event log ends with a partial line; starting a new one");
            file.write_all(b"\n")?;
        }
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;
        drop(file);
        trace!("Appended event {}", event.id);

        if max_retained == 0 {
            return Ok(Vec::new());
        }
        let trimmed = self.trim(max_retained)?;
        let mut trash = self.trashed_ids();
        let mut trash_changed = false;
        for id in &trimmed {
            let mut cleanup = PurgeReport { event_id: id.clone(), ..Default::default() };
            self.remove_derived(id, &mut trash, &mut cleanup);
            trash_changed |= cleanup.trash_entry_removed;
            for error in &cleanup.errors {
                warn!("Incomplete cleanup of trimmed event {}: {}", id, error);
            }
        }
        if trash_changed {
            if let Err(e) = self.write_trash(&trash) {
                warn!("Failed to drop trimmed events from the trash index: {}", e);
            }
        }
        if !trimmed.is_empty() {
            info!("Retention dropped {} old events", trimmed.len());
        }
        Ok(trimmed)
    }

    fn trim(&self, max_retained: usize) -> Result<Vec<String>> {
        let lines = self.raw_lines()?;
        if lines.len() <= max_retained {
            return Ok(Vec::new());
        }
        let cut = lines.len() - max_retained;
        let trimmed = lines[..cut].iter().filter_map(|l| line_id(l)).collect();
        self.rewrite(&lines[cut..])?;
        Ok(trimmed)
    }

    fn raw_lines(&self) -> Result<Vec<String>> {
        let bytes = match fs::read(self.log_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn rewrite(&self, lines: &[String]) -> Result<()> {
        let mut content = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        utils::atomic_write(&self.log_path(), content.as_bytes())
    }

    /// Every parseable event in log order
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for (idx, line) in self.raw_lines()?.iter().enumerate() {
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping unreadable event log line {}: {}", idx + 1, e),
            }
        }
        Ok(events)
    }

    /// Look up an event by exact id
    pub fn get(&self, id: &str) -> Result<Event> {
        self.read_all()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| PromptLogError::EventNotFound(id.to_string()))
    }

    /// Resolve a full id or a unique prefix of one
    ///
    /// Ids present only in the trash set are considered so that leftovers
    /// can still be purged.
    pub fn resolve_id(&self, prefix: &str) -> Result<String> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(PromptLogError::EventNotFound(String::new()));
        }
        let mut ids: BTreeSet<String> = self.read_all()?.into_iter().map(|e| e.id).collect();
        ids.extend(self.trashed_ids());

        if ids.contains(prefix) {
            return Ok(prefix.to_string());
        }
        let matches: Vec<&String> = ids.iter().filter(|id| id.starts_with(prefix)).collect();
        match matches.as_slice() {
            [] => Err(PromptLogError::EventNotFound(prefix.to_string())),
            [only] => Ok((*only).clone()),
            many => Err(PromptLogError::AmbiguousEventId {
                prefix: prefix.to_string(),
                count: many.len(),
            }),
        }
    }

    /// Events visible in `mode`, newest first
    pub fn list(&self, mode: ListMode) -> Result<Vec<Event>> {
        let trash = self.trashed_ids();
        let mut events: Vec<Event> = self
            .read_all()?
            .into_iter()
            .filter(|e| match mode {
                ListMode::Active => !trash.contains(&e.id),
                ListMode::Trash => trash.contains(&e.id),
            })
            .collect();
        events.reverse();
        Ok(events)
    }

    /// Case-insensitive search over prompt, changed paths and tags
    pub fn search(&self, query: &str, mode: ListMode) -> Result<Vec<Event>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .list(mode)?
            .into_iter()
            .filter(|e| e.matches(&needle))
            .collect())
    }

    /// Ids currently in the trash; an unreadable trash file counts as empty
    pub fn trashed_ids(&self) -> BTreeSet<String> {
        let path = self.trash_path();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring unreadable trash index {:?}: {}", path, e);
                BTreeSet::new()
            }),
            Err(_) => BTreeSet::new(),
        }
    }

    fn write_trash(&self, ids: &BTreeSet<String>) -> Result<()> {
        utils::atomic_write(&self.trash_path(), &serde_json::to_vec_pretty(ids)?)
    }

    /// Hide an event from the default listing; returns whether the set changed
    pub fn trash(&self, id: &str) -> Result<bool> {
        self.get(id)?;
        let mut ids = self.trashed_ids();
        let changed = ids.insert(id.to_string());
        if changed {
            self.write_trash(&ids)?;
            debug!("Trashed event {}", id);
        }
        Ok(changed)
    }

    /// Make a trashed event visible again; returns whether the set changed
    pub fn untrash(&self, id: &str) -> Result<bool> {
        let mut ids = self.trashed_ids();
        if !ids.remove(id) {
            self.get(id)?;
            return Ok(false);
        }
        self.write_trash(&ids)?;
        debug!("Restored event {} from trash", id);
        Ok(true)
    }

    /// Irreversibly delete an event and every artifact derived from it
    ///
    /// Each deletion is attempted even when an earlier one fails.
    pub fn purge(&self, id: &str) -> Result<PurgeReport> {
        let in_log = self.read_all()?.iter().any(|e| e.id == id);
        let mut trash = self.trashed_ids();
        if !in_log && !trash.contains(id) {
            return Err(PromptLogError::EventNotFound(id.to_string()));
        }

        let mut report = PurgeReport { event_id: id.to_string(), ..Default::default() };

        match self.remove_log_entry(id) {
            Ok(removed) => report.log_entry_removed = removed,
            Err(e) => report.errors.push(format!("event log: {}", e)),
        }
        self.remove_derived(id, &mut trash, &mut report);
        if report.trash_entry_removed {
            if let Err(e) = self.write_trash(&trash) {
                report.trash_entry_removed = false;
                report.errors.push(format!("trash index: {}", e));
            }
        }

        if report.is_clean() {
            info!("Purged event {}", id);
        } else {
            warn!("Purged event {} with {} failures", id, report.errors.len());
        }
        Ok(report)
    }

    /// Remove everything derived from `id` except its log line
    ///
    /// The trash entry is only dropped from `trash`; the caller writes the
    /// index back.
    fn remove_derived(&self, id: &str, trash: &mut BTreeSet<String>, report: &mut PurgeReport) {
        match self.snapshots.remove_event(id) {
            Ok(removed) => report.snapshots_removed = removed,
            Err(e) => report.errors.push(format!("snapshots: {}", e)),
        }
        match self.remove_artifact(SUMMARIES_DIR, id) {
            Ok(removed) => report.summary_removed = removed,
            Err(e) => report.errors.push(format!("summary: {}", e)),
        }
        match self.remove_artifact(EXPORTS_DIR, id) {
            Ok(removed) => report.export_removed = removed,
            Err(e) => report.errors.push(format!("export: {}", e)),
        }
        report.trash_entry_removed = trash.remove(id);
    }

    fn remove_log_entry(&self, id: &str) -> Result<bool> {
        let lines = self.raw_lines()?;
        let kept: Vec<String> = lines
            .iter()
            .filter(|l| line_id(l).as_deref() != Some(id))
            .cloned()
            .collect();
        if kept.len() == lines.len() {
            return Ok(false);
        }
        self.rewrite(&kept)?;
        Ok(true)
    }

    fn artifact_path(&self, kind: &str, id: &str) -> Result<PathBuf> {
        if !is_valid_event_id(id) {
            return Err(PromptLogError::UnsafePath(id.to_string()));
        }
        Ok(self.dir.join(kind).join(format!("{}.md", id)))
    }

    fn remove_artifact(&self, kind: &str, id: &str) -> Result<bool> {
        utils::remove_file_if_exists(&self.artifact_path(kind, id)?)
    }

    /// Where a summary for `id` is cached
    pub fn summary_path(&self, id: &str) -> Result<PathBuf> {
        self.artifact_path(SUMMARIES_DIR, id)
    }

    /// Where the Markdown export of `id` is written
    pub fn export_path(&self, id: &str) -> Result<PathBuf> {
        self.artifact_path(EXPORTS_DIR, id)
    }

    /// Cached summary; unreadable entries count as missing
    pub fn read_summary(&self, id: &str) -> Option<String> {
        let path = self.summary_path(id).ok()?;
        match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) => {
                trace!("No usable summary at {:?}: {}", path, e);
                None
            }
        }
    }

    /// Cache a summary
    pub fn write_summary(&self, id: &str, text: &str) -> Result<PathBuf> {
        let path = self.summary_path(id)?;
        utils::atomic_write(&path, text.as_bytes())?;
        Ok(path)
    }

    /// Write an exported document
    pub fn write_export(&self, id: &str, text: &str) -> Result<PathBuf> {
        let path = self.export_path(id)?;
        utils::atomic_write(&path, text.as_bytes())?;
        Ok(path)
    }

    /// Storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn ends_without_newline(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

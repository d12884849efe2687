//! File-system watcher feeding the session's edit tracking
//!
//! Stands in for editor change notifications: every create, modify or
//! remove below the repository root is reported to an [`EditSink`] as a
//! repo-relative path together with the number of lines it changed. The
//! sink decides what to do with it; [`crate::PromptLog`] records the path
//! in the touched set and may answer with a [`Nudge`].

use crate::diff::changed_line_count;
use crate::error::Result;
use crate::session::Nudge;
use crate::utils;
use globset::GlobSet;
use notify::{Config, Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Receiver of edits seen by an [`EditWatcher`]
pub trait EditSink: Send + Sync {
    /// Note an edit of `path` (repo-relative) touching `changed_lines` lines
    fn record_edit(&self, path: &str, changed_lines: usize) -> Option<Nudge>;

    /// Content `path` is compared against the first time it is edited
    fn reference_content(&self, path: &str) -> Option<Vec<u8>>;
}

/// Callback for nudges raised while watching
pub type NudgeHandler = Box<dyn Fn(Nudge) + Send + 'static>;

/// Turns raw events into line-counted edits
///
/// Remembers the last content of every path it has seen so repeated saves
/// only count the lines changed since the previous one.
pub(crate) struct EditTracker {
    root: PathBuf,
    ignore: GlobSet,
    sink: Arc<dyn EditSink>,
    known: HashMap<String, Vec<u8>>,
}

impl EditTracker {
    pub(crate) fn new(root: &Path, ignore: GlobSet, sink: Arc<dyn EditSink>) -> Self {
        Self {
            root: root.to_path_buf(),
            ignore,
            sink,
            known: HashMap::new(),
        }
    }

    /// Report the paths of one event; returns the edits and any nudges raised
    pub(crate) fn handle_event(&mut self, event: &Event) -> (usize, Vec<Nudge>) {
        let removed = match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => false,
            EventKind::Remove(_) => true,
            _ => return (0, Vec::new()),
        };

        let mut count = 0;
        let mut nudges = Vec::new();
        for path in &event.paths {
            let Ok(rel) = utils::make_relative(path, &self.root) else {
                continue;
            };
            let rel = utils::path_to_rel_string(&rel);
            if rel.is_empty() || self.ignore.is_match(&rel) || path.is_dir() {
                continue;
            }

            let current = if removed { Vec::new() } else { fs::read(path).unwrap_or_default() };
            let previous = match self.known.remove(&rel) {
                Some(previous) => previous,
                None => self.sink.reference_content(&rel).unwrap_or_default(),
            };
            let lines = changed_line_count(&previous, &current);
            trace!("Edited {} ({} lines)", rel, lines);

            if let Some(nudge) = self.sink.record_edit(&rel, lines) {
                nudges.push(nudge);
            }
            self.known.insert(rel, current);
            count += 1;
        }
        (count, nudges)
    }
}

/// Watches a working tree and reports edited paths
pub struct EditWatcher {
    watcher: Mutex<notify::RecommendedWatcher>,
    root: PathBuf,
    recorded: Arc<AtomicU64>,
}

impl EditWatcher {
    /// Start watching `root` recursively
    pub fn start(root: &Path, ignore: GlobSet, sink: Arc<dyn EditSink>, on_nudge: NudgeHandler) -> Result<Self> {
        info!("Watching {} for edits", root.display());
        let root = root.to_path_buf();
        let recorded = Arc::new(AtomicU64::new(0));

        let mut tracker = EditTracker::new(&root, ignore, sink);
        let handler_recorded = recorded.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                trace!("File system event: {:?}", event);
                let (count, nudges) = tracker.handle_event(&event);
                handler_recorded.fetch_add(count as u64, Ordering::Relaxed);
                for nudge in nudges {
                    on_nudge(nudge);
                }
            }
            Err(e) => error!("Watch error: {}", e),
        })?;
        watcher.configure(Config::default().with_poll_interval(Duration::from_secs(1)))?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            root,
            recorded,
        })
    }

    /// Edits reported so far (counting repeats)
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Stop watching
    pub fn stop(&self) -> Result<()> {
        debug!("Stopping watch on {}", self.root.display());
        self.watcher.lock().unwatch(&self.root)?;
        Ok(())
    }
}

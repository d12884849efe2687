//! Session state
//!
//! [`SessionHandle`] is the context object every operation runs against. It
//! owns:
//!
//! - the persisted [`Session`] record (active flag, repo root, pending checkpoint)
//! - the in-memory [`TouchedFiles`] set fed by editor notifications or the watcher
//! - the large-edit nudge counter
//! - the manifest of the last restore, consumed by undo
//!
//! The record is persisted through a [`KeyValueStore`] so hosts can supply
//! their own storage; [`JsonFileStore`] keeps it in `session.json`.

use crate::error::Result;
use crate::restore::UndoManifest;
use crate::utils;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SESSION_KEY: &str = "session";

/// Persistent key/value storage for session state
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<Value>>;
    /// Write a value
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Key/value store kept as one JSON object in a file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Use `path` as the backing file; it is created on first write
    pub fn new(path: PathBuf) -> Self {
        Self { path, lock: Mutex::new(()) }
    }

    fn read_map(&self) -> Map<String, Value> {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!("Ignoring unreadable session store {:?}", self.path);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock();
        Ok(self.read_map().remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map();
        map.insert(key.to_string(), value);
        utils::atomic_write(&self.path, &serde_json::to_vec_pretty(&Value::Object(map))?)
    }
}

/// Key/value store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Persisted session record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    /// Whether a session is running
    pub active: bool,
    /// Repository bound at session start
    pub repo_root: Option<PathBuf>,
    /// Pending checkpoint reference
    #[serde(alias = "lastCheckpointSha")]
    pub last_checkpoint: Option<String>,
    /// When the pending checkpoint was created (ms)
    pub checkpoint_created_at: Option<i64>,
}

#[derive(Debug, Default)]
struct TouchedInner {
    tracking: bool,
    paths: BTreeSet<String>,
}

/// Paths edited since the last checkpoint
///
/// Cloning shares the same set, so a watcher thread can feed it.
#[derive(Debug, Clone, Default)]
pub struct TouchedFiles {
    inner: Arc<Mutex<TouchedInner>>,
}

impl TouchedFiles {
    /// Record a path if tracking is on; returns whether it was recorded
    pub fn record(&self, path: &str) -> bool {
        let path = utils::normalize_rel_path(path);
        let mut inner = self.inner.lock();
        if !inner.tracking || path.is_empty() {
            return false;
        }
        inner.paths.insert(path);
        true
    }

    /// Whether edits are currently being tracked
    pub fn is_tracking(&self) -> bool {
        self.inner.lock().tracking
    }

    fn reset(&self, tracking: bool) {
        let mut inner = self.inner.lock();
        inner.tracking = tracking;
        inner.paths.clear();
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.inner.lock().paths.clone()
    }

    /// Number of recorded paths
    pub fn len(&self) -> usize {
        self.inner.lock().paths.len()
    }

    /// Whether no path was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Large-edit nudge configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NudgeSettings {
    /// Emit nudges at all
    pub enabled: bool,
    /// Accumulated changed lines that trigger the nudge
    pub threshold_lines: usize,
}

impl Default for NudgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_lines: 20,
        }
    }
}

/// Suggestion to create a checkpoint before editing further
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nudge {
    /// Lines changed so far without a checkpoint
    pub changed_lines: usize,
    /// Threshold that was reached
    pub threshold_lines: usize,
}

impl Nudge {
    /// Text shown to the user
    pub fn message(&self) -> String {
        format!(
            "{} lines changed without a checkpoint. Create one so this work can be logged and restored.",
            self.changed_lines
        )
    }
}

/// Session context owned by the façade
pub struct SessionHandle {
    kv: Arc<dyn KeyValueStore>,
    session: Session,
    touched: TouchedFiles,
    nudge: NudgeSettings,
    unlogged_lines: usize,
    nudged: bool,
    last_restore: Option<UndoManifest>,
}

impl SessionHandle {
    /// Load the persisted session, or start from an inactive one
    pub fn load(kv: Arc<dyn KeyValueStore>, nudge: NudgeSettings) -> Result<Self> {
        let session = match kv.get(SESSION_KEY)? {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Ignoring unreadable session record: {}", e);
                Session::default()
            }),
            None => Session::default(),
        };
        let touched = TouchedFiles::default();
        touched.reset(session.last_checkpoint.is_some());
        debug!("Loaded session {:?}", session);

        Ok(Self {
            kv,
            session,
            touched,
            nudge,
            unlogged_lines: 0,
            nudged: false,
            last_restore: None,
        })
    }

    fn persist(&self) -> Result<()> {
        self.kv.set(SESSION_KEY, serde_json::to_value(&self.session)?)
    }

    /// Current record
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Shared touched-files set
    pub fn touched(&self) -> &TouchedFiles {
        &self.touched
    }

    /// Activate the session for `repo_root`
    pub fn start(&mut self, repo_root: PathBuf) -> Result<()> {
        self.session.active = true;
        self.session.repo_root = Some(repo_root);
        self.persist()?;
        info!("Session started for {:?}", self.session.repo_root);
        Ok(())
    }

    /// Deactivate the session and drop any pending checkpoint
    pub fn end(&mut self) -> Result<()> {
        self.session.active = false;
        self.session.last_checkpoint = None;
        self.session.checkpoint_created_at = None;
        self.touched.reset(false);
        self.unlogged_lines = 0;
        self.nudged = false;
        self.persist()?;
        info!("Session ended");
        Ok(())
    }

    /// Pin a checkpoint and start tracking edits from here
    pub fn create_checkpoint(&mut self, token: String) -> Result<()> {
        self.session.last_checkpoint = Some(token);
        self.session.checkpoint_created_at = Some(utils::now_ms());
        self.touched.reset(true);
        self.unlogged_lines = 0;
        self.nudged = false;
        self.persist()?;
        info!("Checkpoint {:?} created", self.session.last_checkpoint);
        Ok(())
    }

    /// Note an edit; returns a nudge the first time the threshold is reached
    pub fn record_edit(&mut self, path: &str, changed_lines: usize) -> Option<Nudge> {
        self.touched.record(path);
        self.unlogged_lines = self.unlogged_lines.saturating_add(changed_lines);

        let eligible = self.nudge.enabled
            && self.session.active
            && self.session.last_checkpoint.is_none()
            && !self.nudged;
        if eligible && self.unlogged_lines >= self.nudge.threshold_lines {
            self.nudged = true;
            debug!("Nudge after {} changed lines", self.unlogged_lines);
            return Some(Nudge {
                changed_lines: self.unlogged_lines,
                threshold_lines: self.nudge.threshold_lines,
            });
        }
        None
    }

    /// Consume the checkpoint after a successful log
    pub fn finish_log(&mut self) -> Result<()> {
        self.session.last_checkpoint = None;
        self.session.checkpoint_created_at = None;
        self.touched.reset(false);
        self.unlogged_lines = 0;
        self.nudged = false;
        self.persist()
    }

    /// Remember the manifest of the latest restore
    pub fn set_last_restore(&mut self, manifest: UndoManifest) {
        self.last_restore = Some(manifest);
    }

    /// Take the manifest of the latest restore, leaving none behind
    pub fn take_last_restore(&mut self) -> Option<UndoManifest> {
        self.last_restore.take()
    }

    /// Whether an undo is available
    pub fn has_undo(&self) -> bool {
        self.last_restore.is_some()
    }
}

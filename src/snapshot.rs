//! Snapshot storage for event content
//!
//! Every event owns a directory `snapshots/<event-id>/` with a `before/` and
//! an `after/` subtree mirroring repo-relative paths. Entries in the event log
//! refer to those files through [`SnapshotHandle`], an opaque value that only
//! this crate can mint. A handle always names a location inside one event's
//! subtree, so a restore can never be pointed at an arbitrary file.
//!
//! ## Serialized form
//!
//! ```text
//! snap:<event-id>:<before|after>:<repo/relative/path>
//! ```
//!
//! Parsing validates every part. A handle that fails validation while an
//! event is read back from the log deserializes to `None` so the rest of the
//! event stays usable.

use crate::error::{PromptLogError, Result};
use crate::types::Side;
use crate::utils;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

const HANDLE_SCHEME: &str = "snap";

/// Reference to one side of one file's snapshot within one event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotHandle {
    event_id: String,
    side: Side,
    rel_path: String,
}

impl SnapshotHandle {
    pub(crate) fn new(event_id: &str, side: Side, rel_path: &str) -> Result<Self> {
        if !is_valid_event_id(event_id) {
            return Err(PromptLogError::storage(format!("invalid event id '{}'", event_id)));
        }
        if !utils::is_safe_relative(rel_path) {
            return Err(PromptLogError::UnsafePath(rel_path.to_string()));
        }
        Ok(Self {
            event_id: event_id.to_string(),
            side,
            rel_path: rel_path.to_string(),
        })
    }

    /// Parse the serialized form, validating every component
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(HANDLE_SCHEME)?.strip_prefix(':')?;
        // The path is last and may itself contain ':'
        let mut parts = rest.splitn(3, ':');
        let event_id = parts.next()?;
        let side = parts.next()?.parse::<Side>().ok()?;
        let rel_path = parts.next()?;
        Self::new(event_id, side, rel_path).ok()
    }

    /// Event this handle belongs to
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Snapshot side
    pub fn side(&self) -> Side {
        self.side
    }

    /// Repo-relative path of the snapshotted file
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }
}

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", HANDLE_SCHEME, self.event_id, self.side, self.rel_path)
    }
}

impl Serialize for SnapshotHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SnapshotHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SnapshotHandle::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid snapshot handle '{}'", raw)))
    }
}

/// Deserialize an optional handle, turning anything invalid into `None`
pub(crate) fn lenient_handle<'de, D>(deserializer: D) -> std::result::Result<Option<SnapshotHandle>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => {
            let handle = SnapshotHandle::parse(&s);
            if handle.is_none() {
                warn!("Ignoring invalid snapshot handle {:?}", s);
            }
            handle
        }
        _ => None,
    })
}

/// Event ids name directories, so only a conservative character set is accepted
pub(crate) fn is_valid_event_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Owner of the `snapshots/` directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `root` (the `snapshots/` directory)
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root directory of all snapshots
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one event; `None` for an id that cannot name a directory
    pub fn event_dir(&self, event_id: &str) -> Option<PathBuf> {
        is_valid_event_id(event_id).then(|| self.root.join(event_id))
    }

    /// Create `before/` and `after/` for a fresh event
    pub fn prepare(&self, event_id: &str) -> Result<PathBuf> {
        let dir = self
            .event_dir(event_id)
            .ok_or_else(|| PromptLogError::storage(format!("invalid event id '{}'", event_id)))?;
        if dir.exists() {
            return Err(PromptLogError::storage(format!(
                "snapshot directory for {} already exists",
                event_id
            )));
        }
        fs::create_dir_all(dir.join(Side::Before.as_str()))?;
        fs::create_dir_all(dir.join(Side::After.as_str()))?;
        debug!("Prepared snapshot directory {:?}", dir);
        Ok(dir)
    }

    /// Write one side of a file's snapshot and mint its handle
    pub(crate) fn write(
        &self,
        event_id: &str,
        side: Side,
        rel_path: &str,
        content: &[u8],
    ) -> Result<SnapshotHandle> {
        let handle = SnapshotHandle::new(event_id, side, rel_path)?;
        let path = self.location(&handle);
        utils::write_creating_parents(&path, content)?;
        trace!("Wrote {} ({} bytes)", handle, content.len());
        Ok(handle)
    }

    fn location(&self, handle: &SnapshotHandle) -> PathBuf {
        self.root
            .join(&handle.event_id)
            .join(handle.side.as_str())
            .join(&handle.rel_path)
    }

    /// Resolve a handle to its file, provided it belongs to `event_id`
    pub fn resolve(&self, handle: &SnapshotHandle, event_id: &str) -> Option<PathBuf> {
        if handle.event_id != event_id {
            warn!(
                "Snapshot handle {} does not belong to event {}",
                handle, event_id
            );
            return None;
        }
        Some(self.location(handle))
    }

    /// Read snapshot bytes; `None` when unresolvable or unreadable
    pub fn read(&self, handle: &SnapshotHandle, event_id: &str) -> Option<Vec<u8>> {
        let path = self.resolve(handle, event_id)?;
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Cannot read snapshot {}: {}", handle, e);
                None
            }
        }
    }

    /// Delete an event's whole snapshot tree; `Ok(false)` when it was absent
    pub fn remove_event(&self, event_id: &str) -> Result<bool> {
        match self.event_dir(event_id) {
            Some(dir) => utils::remove_dir_all_if_exists(&dir),
            None => Ok(false),
        }
    }
}

//! Utility functions for promptlog
//!
//! Small helpers shared by the builder, store and restore engine:
//!
//! ### Path handling
//! - Normalizing repo-relative paths to forward-slash form
//! - Joining a repo-relative path onto a root without escaping it, lexically
//!   or through a symlinked directory
//! - Converting absolute paths back to repo-relative ones
//!
//! ### File operations
//! - Atomic whole-file replacement
//! - Writing a file while creating its parent directories
//! - Removing a file where "already gone" counts as success
//!
//! ### Data processing
//! - SHA-256 hex digests
//! - Human-readable byte counts
//! - Millisecond timestamps

use crate::error::{PromptLogError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Hash arbitrary data using SHA-256
///
/// Returns the digest as a 64-character hexadecimal string.
///
/// ```rust,ignore
/// let hash = hash_data(b"Hello, world!");
/// assert_eq!(hash.len(), 64);
/// ```
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Normalize a repo-relative path to forward-slash form
///
/// Backslashes become forward slashes, `.` segments and empty segments are
/// dropped, and a leading `./` or `/` is stripped. `..` segments are kept so
/// that [`is_safe_relative`] can reject them afterwards.
///
/// ```rust,ignore
/// assert_eq!(normalize_rel_path(".\\src\\a.ts"), "src/a.ts");
/// assert_eq!(normalize_rel_path("src//b.ts"), "src/b.ts");
/// ```
pub fn normalize_rel_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Check that a forward-slash relative path stays below its base
///
/// Only plain name components are allowed: no root, no drive prefix, no `..`.
pub fn is_safe_relative(rel_path: &str) -> bool {
    if rel_path.is_empty() {
        return false;
    }
    let path = Path::new(rel_path);
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Join a repo-relative path onto `base`, refusing paths that would escape it
pub fn safe_join(base: &Path, rel_path: &str) -> Result<PathBuf> {
    if !is_safe_relative(rel_path) {
        return Err(PromptLogError::UnsafePath(rel_path.to_string()));
    }
    Ok(base.join(rel_path))
}

/// Join like [`safe_join`], then check the directory the path lands in
///
/// The nearest existing ancestor of the result must resolve inside `base`,
/// so a symlinked directory in the tree cannot redirect a write or delete
/// outside it. A final component that is itself a symlink is left to the
/// caller.
pub fn contained_join(base: &Path, rel_path: &str) -> Result<PathBuf> {
    let joined = safe_join(base, rel_path)?;
    let base_canon = base.canonicalize()?;

    let mut ancestor = joined.parent();
    while let Some(dir) = ancestor {
        if fs::symlink_metadata(dir).is_ok() {
            return match dir.canonicalize() {
                Ok(resolved) if resolved.starts_with(&base_canon) => Ok(joined),
                _ => Err(PromptLogError::UnsafePath(rel_path.to_string())),
            };
        }
        ancestor = dir.parent();
    }
    Err(PromptLogError::UnsafePath(rel_path.to_string()))
}

/// Make a path relative to a base path
///
/// Tries a lexical strip first so symbolic links inside the tree keep their
/// own path, and only canonicalizes both sides when that fails.
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            PromptLogError::internal(format!(
                "Path {:?} is not relative to {:?}",
                path_canon, base_canon
            ))
        })
}

/// Render a relative `Path` in normalized forward-slash form
pub fn path_to_rel_string(path: &Path) -> String {
    normalize_rel_path(&path.to_string_lossy())
}

/// Format bytes in human-readable form
///
/// Uses 1024 as the conversion factor.
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Atomic file write (write to a temp file in the same directory, then rename)
///
/// Readers see either the old content or the new content, never a torn
/// write. The temporary file is removed if any step fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| PromptLogError::Io(e.error))?;

    trace!("Atomically wrote {:?} ({} bytes)", path, content.len());
    Ok(())
}

/// Write a file, creating missing parent directories first
pub fn write_creating_parents(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Remove a file; returns `Ok(false)` when it was already absent
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove a directory tree; returns `Ok(false)` when it was already absent
pub fn remove_dir_all_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Total size of all regular files below `path` (0 when it does not exist)
pub fn dir_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Shorten an id for display to its first eight characters
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

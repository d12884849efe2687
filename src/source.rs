//! Working-tree change sources
//!
//! A [`DiffSource`] answers three questions for the event builder: which
//! files changed in the working tree, what a file contained at some
//! reference, and which reference the tree currently sits on.
//!
//! Two implementations ship with the crate:
//!
//! - [`GitSource`] runs the `git` binary as a subprocess
//! - [`DirectorySource`] works on plain directories by copying the tree
//!   into a baseline when a checkpoint is pinned
//!
//! [`detect`] picks one for a directory.

use crate::diff::is_binary_content;
use crate::error::{PromptLogError, Result};
use crate::types::WORKING_REF_PREFIX;
use crate::utils;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Reference used for the left side of tracked changes in a git repository
pub const HEAD_REF: &str = "HEAD";

/// One changed file in the working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingChange {
    /// Repo-relative path, forward slashes
    pub path: String,
    /// Reference holding the previous content; `None` for new files
    pub left: Option<String>,
    /// Current location on disk; `None` for deleted files
    pub right: Option<PathBuf>,
}

/// What a source knows about one file at one reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefContent {
    /// The file exists there with these bytes (binary content included)
    Present(Vec<u8>),
    /// The file does not exist there
    Absent,
    /// The file exists there but its content cannot be fetched
    Unavailable(String),
}

impl RefContent {
    /// Whether the file existed at the reference
    pub fn existed(&self) -> bool {
        !matches!(self, RefContent::Absent)
    }
}

/// Provider of working-tree changes and historical content
pub trait DiffSource: Send + Sync {
    /// Root of the working tree, if one is open
    fn repo_root(&self) -> Option<&Path>;

    /// Staged, unstaged and untracked changes, one entry per path
    ///
    /// Empty when no working tree is open. Order is unspecified.
    fn current_changes(&self) -> Vec<WorkingChange>;

    /// Look `rel_path` up at `reference`
    ///
    /// Never fails. A file that exists at the reference but is over the
    /// size limit, or whose content cannot be read, is
    /// [`RefContent::Unavailable`], not [`RefContent::Absent`].
    fn lookup_at_ref(&self, reference: &str, rel_path: &str) -> RefContent;

    /// Text content of `rel_path` at `reference`
    ///
    /// `None` covers a missing file, binary or oversized content, and any
    /// error while fetching it.
    fn content_at_ref(&self, reference: &str, rel_path: &str) -> Option<Vec<u8>> {
        match self.lookup_at_ref(reference, rel_path) {
            RefContent::Present(content) if !is_binary_content(&content) => Some(content),
            _ => None,
        }
    }

    /// Reference the working tree is currently based on
    fn current_revision(&self) -> Option<String>;

    /// Pin a checkpoint and return its reference
    fn pin_checkpoint(&self) -> Option<String> {
        self.current_revision()
    }

    /// Short name for logs and status output
    fn name(&self) -> &'static str;
}

fn exceeds(limit: u64, len: u64) -> bool {
    limit > 0 && len > limit
}

/// Git-backed source using subprocess calls
#[derive(Debug, Clone)]
pub struct GitSource {
    root: PathBuf,
    max_file_size: u64,
}

impl GitSource {
    /// Open the repository containing `path`
    pub fn open(path: &Path) -> Result<Self> {
        let root = find_git_root(path)?;
        debug!("Using git repository at {:?}", root);
        Ok(Self { root, max_file_size: 0 })
    }

    /// Limit the size of content returned by [`DiffSource::lookup_at_ref`]
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new("git").args(args).current_dir(&self.root).output()?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(PromptLogError::VersionControl(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Find the top level of the git repository containing `path`
pub fn find_git_root(path: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(path)
        .output()?;

    if output.status.success() {
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(PathBuf::from(root))
    } else {
        Err(PromptLogError::VersionControl(format!(
            "{:?} is not inside a git repository",
            path
        )))
    }
}

/// Parse `git status --porcelain=v1 -z` output
///
/// Renamed entries contribute the new path as a new file and the old path
/// as a deletion.
pub fn parse_porcelain(output: &[u8], root: &Path) -> Vec<WorkingChange> {
    let mut changes: BTreeMap<String, WorkingChange> = BTreeMap::new();
    let mut records = output.split(|b| *b == 0).filter(|r| !r.is_empty());

    while let Some(record) = records.next() {
        if record.len() < 4 {
            continue;
        }
        let x = record[0] as char;
        let y = record[1] as char;
        let path = utils::normalize_rel_path(&String::from_utf8_lossy(&record[3..]));
        if path.is_empty() || (x == '!' && y == '!') {
            continue;
        }

        if x == 'R' || x == 'C' {
            let original = records
                .next()
                .map(|r| utils::normalize_rel_path(&String::from_utf8_lossy(r)));
            changes.insert(
                path.clone(),
                WorkingChange { right: Some(root.join(&path)), path, left: None },
            );
            if let Some(original) = original.filter(|o| x == 'R' && !o.is_empty()) {
                changes
                    .entry(original.clone())
                    .or_insert(WorkingChange { path: original, left: Some(HEAD_REF.to_string()), right: None });
            }
            continue;
        }

        let change = if x == '?' || x == 'A' {
            WorkingChange { right: Some(root.join(&path)), path, left: None }
        } else if x == 'D' || y == 'D' {
            WorkingChange { path, left: Some(HEAD_REF.to_string()), right: None }
        } else {
            WorkingChange { right: Some(root.join(&path)), path, left: Some(HEAD_REF.to_string()) }
        };
        changes.insert(change.path.clone(), change);
    }

    changes.into_values().collect()
}

impl DiffSource for GitSource {
    fn repo_root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn current_changes(&self) -> Vec<WorkingChange> {
        match self.git(&["status", "--porcelain=v1", "-z", "--untracked-files=all"]) {
            Ok(output) => {
                let changes = parse_porcelain(&output, &self.root);
                debug!("git status reported {} changed paths", changes.len());
                changes
            }
            Err(e) => {
                warn!("git status failed: {}", e);
                Vec::new()
            }
        }
    }

    fn lookup_at_ref(&self, reference: &str, rel_path: &str) -> RefContent {
        if reference.starts_with(WORKING_REF_PREFIX) {
            // Synthetic tokens only appear before the first commit
            return RefContent::Absent;
        }
        if !utils::is_safe_relative(rel_path) {
            return RefContent::Unavailable(format!("unsafe path {:?}", rel_path));
        }
        let object = format!("{}:{}", reference, rel_path);

        let size = match self.git(&["cat-file", "-s", &object]) {
            Ok(out) => String::from_utf8_lossy(&out).trim().parse::<u64>().ok(),
            Err(e) => {
                trace!("{} not present at {}: {}", rel_path, reference, e);
                return RefContent::Absent;
            }
        };
        if let Some(size) = size.filter(|size| exceeds(self.max_file_size, *size)) {
            debug!("{} is {} bytes at {}, over the size limit", rel_path, size, reference);
            return RefContent::Unavailable(format!(
                "{} at {} exceeds the {} snapshot limit",
                utils::format_bytes(size),
                reference,
                utils::format_bytes(self.max_file_size)
            ));
        }

        match self.git(&["show", &object]) {
            Ok(content) => RefContent::Present(content),
            Err(e) => RefContent::Unavailable(e.to_string()),
        }
    }

    fn current_revision(&self) -> Option<String> {
        self.git(&["rev-parse", "--verify", "HEAD"])
            .ok()
            .map(|out| String::from_utf8_lossy(&out).trim().to_string())
            .filter(|rev| !rev.is_empty())
    }

    fn name(&self) -> &'static str {
        "git"
    }
}

/// Source for directories without version control
///
/// Pinning a checkpoint copies every non-ignored file into `baseline_dir`
/// and records a synthetic `:working:<ms>` token. Changes are computed by
/// comparing the tree against that copy; without a baseline every file
/// counts as changed.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    baseline_dir: PathBuf,
    ignore: GlobSet,
    max_file_size: u64,
}

const BASELINE_TOKEN_FILE: &str = "token";
const BASELINE_FILES_DIR: &str = "files";
const BASELINE_OVERSIZED_FILE: &str = "oversized.json";

/// Size and modification time of a file too large to copy into the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FileStamp {
    len: u64,
    modified_ms: i64,
}

impl FileStamp {
    fn of(meta: &fs::Metadata) -> Self {
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self { len: meta.len(), modified_ms }
    }
}

impl DirectorySource {
    /// Create a source for `root` keeping its baseline in `baseline_dir`
    pub fn new(root: PathBuf, baseline_dir: PathBuf, ignore: GlobSet) -> Self {
        Self { root, baseline_dir, ignore, max_file_size: 0 }
    }

    /// Files larger than this are neither copied into the baseline nor returned
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Token of the pinned baseline, if any
    pub fn baseline_token(&self) -> Option<String> {
        fs::read_to_string(self.baseline_dir.join(BASELINE_TOKEN_FILE))
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Copy the current tree into the baseline under `token`
    pub fn pin_as(&self, token: &str) -> Result<()> {
        utils::remove_dir_all_if_exists(&self.baseline_dir)?;
        let files_dir = self.baseline_dir.join(BASELINE_FILES_DIR);
        fs::create_dir_all(&files_dir)?;

        let mut copied = 0usize;
        let mut oversized = BTreeMap::new();
        for rel in self.walk_files() {
            let src = self.root.join(&rel);
            match fs::metadata(&src) {
                Ok(meta) if exceeds(self.max_file_size, meta.len()) => {
                    oversized.insert(rel, FileStamp::of(&meta));
                    continue;
                }
                Ok(_) => {}
                Err(_) => continue,
            }
            let dest = utils::safe_join(&files_dir, &rel)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&src, &dest)?;
            copied += 1;
        }

        utils::atomic_write(
            &self.baseline_dir.join(BASELINE_OVERSIZED_FILE),
            &serde_json::to_vec_pretty(&oversized)?,
        )?;
        utils::atomic_write(&self.baseline_dir.join(BASELINE_TOKEN_FILE), token.as_bytes())?;
        debug!(
            "Pinned baseline {} with {} files ({} over the size limit)",
            token,
            copied,
            oversized.len()
        );
        Ok(())
    }

    fn walk_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || utils::make_relative(e.path(), &self.root)
                        .map(|rel| !self.ignore.is_match(utils::path_to_rel_string(&rel)))
                        .unwrap_or(false)
            });
        for entry in walker {
            match entry {
                Ok(e) if e.file_type().is_file() => {
                    if let Ok(rel) = utils::make_relative(e.path(), &self.root) {
                        files.push(utils::path_to_rel_string(&rel));
                    }
                }
                Ok(_) => {}
                Err(e) => trace!("Skipping unreadable entry: {}", e),
            }
        }
        files
    }

    fn baseline_files(&self) -> BTreeMap<String, PathBuf> {
        let files_dir = self.baseline_dir.join(BASELINE_FILES_DIR);
        WalkDir::new(&files_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = utils::make_relative(e.path(), &files_dir).ok()?;
                Some((utils::path_to_rel_string(&rel), e.path().to_path_buf()))
            })
            .collect()
    }

    /// Files that existed at pin time but were too large to copy
    fn oversized_files(&self) -> BTreeMap<String, FileStamp> {
        fs::read(self.baseline_dir.join(BASELINE_OVERSIZED_FILE))
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())
            .unwrap_or_default()
    }
}

fn same_content(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) if ma.len() != mb.len() => false,
        (Ok(_), Ok(_)) => matches!((fs::read(a), fs::read(b)), (Ok(x), Ok(y)) if x == y),
        _ => false,
    }
}

impl DiffSource for DirectorySource {
    fn repo_root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn current_changes(&self) -> Vec<WorkingChange> {
        let token = self.baseline_token();
        let (mut baseline, mut oversized) = if token.is_some() {
            (self.baseline_files(), self.oversized_files())
        } else {
            (BTreeMap::new(), BTreeMap::new())
        };
        let mut changes = Vec::new();

        for rel in self.walk_files() {
            let current = self.root.join(&rel);
            let unchanged = match (baseline.remove(&rel), oversized.remove(&rel)) {
                (Some(pinned), _) => same_content(&current, &pinned),
                (None, Some(stamp)) => {
                    fs::metadata(&current).map(|m| FileStamp::of(&m)).ok() == Some(stamp)
                }
                (None, None) => {
                    changes.push(WorkingChange { path: rel, left: None, right: Some(current) });
                    continue;
                }
            };
            if !unchanged {
                changes.push(WorkingChange { path: rel, left: token.clone(), right: Some(current) });
            }
        }

        // Whatever is left in the baseline is gone from the tree
        for rel in baseline.into_keys().chain(oversized.into_keys()) {
            changes.push(WorkingChange { path: rel, left: token.clone(), right: None });
        }

        debug!("Directory scan found {} changed paths", changes.len());
        changes
    }

    fn lookup_at_ref(&self, reference: &str, rel_path: &str) -> RefContent {
        if self.baseline_token().as_deref() != Some(reference) {
            return RefContent::Unavailable(format!("baseline {} is no longer pinned", reference));
        }
        let path = match utils::safe_join(&self.baseline_dir.join(BASELINE_FILES_DIR), rel_path) {
            Ok(path) => path,
            Err(e) => return RefContent::Unavailable(e.to_string()),
        };
        match fs::metadata(&path) {
            Ok(meta) if exceeds(self.max_file_size, meta.len()) => RefContent::Unavailable(format!(
                "{} exceeds the {} snapshot limit",
                utils::format_bytes(meta.len()),
                utils::format_bytes(self.max_file_size)
            )),
            Ok(_) => match fs::read(&path) {
                Ok(content) => RefContent::Present(content),
                Err(e) => RefContent::Unavailable(e.to_string()),
            },
            Err(_) if self.oversized_files().contains_key(rel_path) => RefContent::Unavailable(
                "over the size limit when the checkpoint was pinned".to_string(),
            ),
            Err(_) => RefContent::Absent,
        }
    }

    fn current_revision(&self) -> Option<String> {
        None
    }

    fn pin_checkpoint(&self) -> Option<String> {
        let token = format!("{}{}", WORKING_REF_PREFIX, utils::now_ms());
        match self.pin_as(&token) {
            Ok(()) => Some(token),
            Err(e) => {
                warn!("Failed to pin working tree baseline: {}", e);
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

/// Pick a source for `path`: git when it is inside a repository
pub fn detect(path: &Path, baseline_dir: PathBuf, ignore: GlobSet, max_file_size: u64) -> Box<dyn DiffSource> {
    match GitSource::open(path) {
        Ok(git) => Box::new(git.with_max_file_size(max_file_size)),
        Err(e) => {
            debug!("Falling back to directory source: {}", e);
            Box::new(
                DirectorySource::new(path.to_path_buf(), baseline_dir, ignore)
                    .with_max_file_size(max_file_size),
            )
        }
    }
}

//! Shared fixtures for the test suites
//!
//! [`FakeSource`] behaves like a tiny version-control system: `commit`
//! records the current tree under a revision name, and the working tree is
//! compared against the last commit.

use ::promptlog::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

pub const STORAGE_DIR: &str = ".promptlog";

type Tree = BTreeMap<String, Vec<u8>>;

/// In-memory revision store over a real working tree
pub struct FakeSource {
    root: PathBuf,
    head: Mutex<Option<String>>,
    commits: Mutex<HashMap<String, Tree>>,
}

impl FakeSource {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            head: Mutex::new(None),
            commits: Mutex::new(HashMap::new()),
        }
    }

    /// Record the working tree as `revision` and move HEAD to it
    pub fn commit(&self, revision: &str) {
        let tree = self.read_tree();
        self.commits.lock().insert(revision.to_string(), tree);
        *self.head.lock() = Some(revision.to_string());
    }

    fn read_tree(&self) -> Tree {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != STORAGE_DIR)
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(&self.root).unwrap();
                let rel = rel.to_string_lossy().replace('\\', "/");
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    fn head_tree(&self) -> Tree {
        match self.head.lock().as_ref() {
            Some(rev) => self.commits.lock().get(rev).cloned().unwrap_or_default(),
            None => Tree::new(),
        }
    }
}

impl DiffSource for FakeSource {
    fn repo_root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn current_changes(&self) -> Vec<WorkingChange> {
        let head = self.head.lock().clone();
        let mut committed = self.head_tree();
        let mut changes = Vec::new();
        for (path, content) in self.read_tree() {
            match committed.remove(&path) {
                Some(old) if old == content => {}
                Some(_) => changes.push(WorkingChange {
                    right: Some(self.root.join(&path)),
                    path,
                    left: head.clone(),
                }),
                None => changes.push(WorkingChange {
                    right: Some(self.root.join(&path)),
                    path,
                    left: None,
                }),
            }
        }
        for (path, _) in committed {
            changes.push(WorkingChange { path, left: head.clone(), right: None });
        }
        changes
    }

    fn lookup_at_ref(&self, reference: &str, rel_path: &str) -> RefContent {
        match self.commits.lock().get(reference).and_then(|tree| tree.get(rel_path)) {
            Some(content) => RefContent::Present(content.clone()),
            None => RefContent::Absent,
        }
    }

    fn current_revision(&self) -> Option<String> {
        self.head.lock().clone()
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// A repository directory with a PromptLog on top of a [`FakeSource`]
pub struct Fixture {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub source: Arc<FakeSource>,
    pub log: PromptLog,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_builder(PromptLogBuilder::new())
    }

    pub fn with_builder(builder: PromptLogBuilder) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        let source = Arc::new(FakeSource::new(root.clone()));
        let log = builder
            .source(source.clone())
            .build(root.clone(), root.join(STORAGE_DIR))
            .unwrap();
        Self { temp_dir, root, source, log }
    }

    pub fn storage(&self) -> PathBuf {
        self.root.join(STORAGE_DIR)
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn write_bytes(&self, rel: &str, content: &[u8]) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root.join(rel)).ok()
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.root.join(rel)).unwrap();
    }

    /// Log a prompt, failing the test when nothing was logged
    pub fn log_prompt(&self, prompt: &str) -> BuildReport {
        match self.log.log_prompt(prompt, None, Vec::new()).unwrap() {
            BuildOutcome::Logged(report) => report,
            BuildOutcome::NothingToLog => panic!("expected '{}' to log an event", prompt),
        }
    }

    /// The canonical scenario: `abc123` holds `src/a.ts` (v1) and
    /// `src/c.ts`; the prompt modifies a, adds b and deletes c.
    pub fn abc123_event(&self) -> Event {
        self.write("src/a.ts", "export const a = 1;\n");
        self.write("src/c.ts", "export const c = 3;\n");
        self.source.commit("abc123");

        self.log.start_session().unwrap();
        assert_eq!(self.log.create_checkpoint().unwrap(), "abc123");

        self.write("src/a.ts", "export const a = 2;\n");
        self.write("src/b.ts", "export const b = 2;\n");
        self.remove("src/c.ts");
        for path in ["src/a.ts", "src/b.ts", "src/c.ts"] {
            self.log.record_edit(path, 1);
        }

        self.log_prompt("Bump a, add b, drop c").event
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

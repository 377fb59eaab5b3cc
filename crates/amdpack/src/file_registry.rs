//! In-memory registry of project files.
//!
//! The registry is the single place processors read from and write to while a
//! build runs. Files are keyed by their `/`-separated path relative to the
//! project root. Each record carries an explicit processing state per concern
//! so that recursive transformations can tell "not yet touched", "currently
//! being rewritten further up the stack" and "done" apart.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, trace};
use walkdir::WalkDir;

use crate::{
    pattern_gate::PatternSet,
    util::{FxIndexMap, extname, normalize_path, to_slash_path},
};

/// Transformation a processing state refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    /// The module compiler combined this file with its dependencies
    ModuleCombine,
    /// The CSS importer inlined this file's `@import` directives
    CssImport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessState {
    #[default]
    Unprocessed,
    /// Rewriting has started but not finished; seen by re-entrant calls on cycles
    InProgress,
    Processed,
}

/// A project file and its current (possibly rewritten) text
#[derive(Debug, Clone)]
pub struct FileRecord {
    path: String,
    extname: String,
    raw_data: String,
    data: String,
    module_combine: ProcessState,
    css_import: ProcessState,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let path = normalize_path(&path).unwrap_or(path);
        let raw_data = content.into();
        Self {
            extname: extname(&path),
            data: raw_data.clone(),
            raw_data,
            path,
            module_combine: ProcessState::Unprocessed,
            css_import: ProcessState::Unprocessed,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn extname(&self) -> &str {
        &self.extname
    }

    /// Text as it was read from disk
    pub fn raw_data(&self) -> &str {
        &self.raw_data
    }

    /// Current text, including rewrites by earlier processors
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn set_data(&mut self, data: impl Into<String>) {
        self.data = data.into();
    }

    pub fn status(&self, concern: Concern) -> ProcessState {
        match concern {
            Concern::ModuleCombine => self.module_combine,
            Concern::CssImport => self.css_import,
        }
    }

    pub fn set_status(&mut self, concern: Concern, state: ProcessState) {
        trace!("{}: {concern:?} -> {state:?}", self.path);
        match concern {
            Concern::ModuleCombine => self.module_combine = state,
            Concern::CssImport => self.css_import = state,
        }
    }

    pub fn is_processed(&self, concern: Concern) -> bool {
        self.status(concern) == ProcessState::Processed
    }
}

/// All text files of a project, in traversal order
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    base_dir: PathBuf,
    files: FxIndexMap<String, FileRecord>,
    /// Files that are not valid UTF-8; copied to the output untouched
    binary_files: Vec<String>,
}

impl FileRegistry {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            files: FxIndexMap::default(),
            binary_files: Vec::new(),
        }
    }

    /// Load every file below `base_dir`, skipping paths matched by `skip`
    pub fn load(base_dir: &Path, skip: &PatternSet) -> Result<Self> {
        let mut registry = Self::new(base_dir);

        let walker = WalkDir::new(base_dir).sort_by_file_name().into_iter();
        for entry in walker.filter_entry(|entry| {
            entry.depth() == 0
                || entry
                    .path()
                    .strip_prefix(base_dir)
                    .map(|rel| !skip.is_path_match(&to_slash_path(rel)))
                    .unwrap_or(true)
        }) {
            let entry = entry
                .with_context(|| format!("Failed to traverse {}", base_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = to_slash_path(
                entry
                    .path()
                    .strip_prefix(base_dir)
                    .with_context(|| format!("{} is outside the project", entry.path().display()))?,
            );
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;

            match String::from_utf8(bytes) {
                Ok(text) => registry.insert(FileRecord::new(relative, text)),
                Err(_) => {
                    debug!("Treating {relative} as binary");
                    registry.binary_files.push(relative);
                }
            }
        }

        debug!(
            "Loaded {} text files and {} binary files from {}",
            registry.len(),
            registry.binary_files.len(),
            base_dir.display()
        );
        Ok(registry)
    }

    /// Project root all registry paths are relative to
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.files.insert(record.path.clone(), record);
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path).or_else(|| {
            normalize_path(path)
                .filter(|normalized| normalized != path)
                .and_then(|normalized| self.files.get(&normalized))
        })
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileRecord> {
        if self.files.contains_key(path) {
            return self.files.get_mut(path);
        }
        let normalized = normalize_path(path)?;
        self.files.get_mut(&normalized)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Snapshot of all paths, for iterating while records are mutated
    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn binary_files(&self) -> &[String] {
        &self.binary_files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

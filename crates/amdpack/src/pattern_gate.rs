//! Include/exclude pattern matching shared by every processor and by the
//! bundler's combine rules.
//!
//! Patterns come from configuration as arbitrarily nested lists
//! ([`PatternList`]). They are flattened and compiled once into a
//! [`PatternSet`]; nothing downstream ever sees the nested shape.
//!
//! Matching uses glob semantics where `*` matches any run of characters,
//! including `/`, and `?` matches a single character. A pattern that is not a
//! valid glob is compared literally.

use glob::{MatchOptions, Pattern};
use log::warn;
use serde::Deserialize;

use crate::{file_registry::FileRecord, util::basename};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Pattern list as written in configuration: a single pattern or nested lists of patterns
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PatternList {
    One(String),
    Many(Vec<PatternList>),
}

impl Default for PatternList {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl PatternList {
    /// All patterns in depth-first order
    pub fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<String>) {
        match self {
            Self::One(pattern) => out.push(pattern.clone()),
            Self::Many(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(_) => false,
            Self::Many(items) => items.iter().all(Self::is_empty),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for PatternList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::Many(iter.into_iter().map(|s| Self::One(s.into())).collect())
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    glob: Option<Pattern>,
}

impl CompiledPattern {
    fn new(source: String) -> Self {
        let glob = match Pattern::new(&source) {
            Ok(glob) => Some(glob),
            Err(e) => {
                warn!("Treating invalid glob pattern '{source}' literally: {e}");
                None
            }
        };
        Self { source, glob }
    }

    fn matches(&self, candidate: &str) -> bool {
        self.source == candidate
            || self
                .glob
                .as_ref()
                .is_some_and(|glob| glob.matches_with(candidate, MATCH_OPTIONS))
    }

    /// Patterns without a separator also match the bare file name
    fn matches_path(&self, path: &str) -> bool {
        self.matches(path) || (!self.source.contains('/') && self.matches(basename(path)))
    }
}

/// Flat set of compiled patterns
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
}

impl PatternSet {
    pub fn new(list: &PatternList) -> Self {
        Self::from_patterns(list.flatten())
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| CompiledPattern::new(p.into()))
                .collect(),
        }
    }

    /// Whether any pattern matches `candidate` as a whole (module ids)
    pub fn is_match(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(candidate))
    }

    /// Whether any pattern matches a project-relative path or, for patterns
    /// without `/`, its file name
    pub fn is_path_match(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches_path(path))
    }
}

/// Exclude/include rules applied to module ids while combining
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    exclude: PatternSet,
    include: PatternSet,
}

impl RuleSet {
    pub fn new(exclude: &PatternList, include: &PatternList) -> Self {
        Self {
            exclude: PatternSet::new(exclude),
            include: PatternSet::new(include),
        }
    }

    /// Excluded when an exclude pattern matches and no include pattern does
    pub fn is_excluded(&self, module_id: &str) -> bool {
        self.exclude.is_match(module_id) && !self.include.is_match(module_id)
    }

    pub fn is_included(&self, module_id: &str) -> bool {
        self.include.is_match(module_id)
    }
}

/// Eligibility check every processor runs before touching a file
#[derive(Debug, Clone, Default)]
pub struct PatternGate {
    exclude: PatternSet,
    include: PatternSet,
}

impl PatternGate {
    pub fn new(exclude: &PatternList, include: &PatternList) -> Self {
        Self {
            exclude: PatternSet::new(exclude),
            include: PatternSet::new(include),
        }
    }

    /// Excluded when an exclude pattern matches and no include pattern overrides it
    pub fn is_excluded(&self, file: &FileRecord) -> bool {
        let path = file.path();
        self.exclude.is_path_match(path) && !self.include.is_path_match(path)
    }

    pub fn is_included(&self, file: &FileRecord) -> bool {
        self.include.is_path_match(file.path())
    }

    pub fn accepts(&self, file: &FileRecord) -> bool {
        !self.is_excluded(file)
    }
}

//! Reader for the project's AMD module configuration (`module.conf`).
//!
//! The file is a JSON document in the shape AMD loaders accept:
//!
//! ```json
//! {
//!     "baseUrl": "src",
//!     "paths": { "net": "../lib/net" },
//!     "packages": [{ "name": "er", "location": "../dep/er/src", "main": "main" }],
//!     "combine": { "bar": true, "er": { "exclude": ["er/*"] } }
//! }
//! ```
//!
//! `baseUrl` is relative to the directory holding the config file; `paths` and
//! package locations are relative to `baseUrl`.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;

use crate::{
    pattern_gate::PatternList,
    util::{dirname, normalize_join, normalize_path},
};

pub const DEFAULT_MODULE_CONFIG: &str = "module.conf";

/// Per-module combine setting from the `combine` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CombineSetting {
    Enabled(bool),
    Rules {
        #[serde(default)]
        exclude: PatternList,
        #[serde(default)]
        include: PatternList,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageConfig {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub main: Option<String>,
}

impl PackageConfig {
    /// Package location, defaulting to the package name
    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or(&self.name)
    }

    /// Main module name without a `.js` suffix, defaulting to `main`
    pub fn main(&self) -> &str {
        let main = self.main.as_deref().unwrap_or("main");
        let main = main.strip_prefix("./").unwrap_or(main);
        main.strip_suffix(".js").unwrap_or(main)
    }
}

/// Packages may be listed by bare name
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PackageEntry {
    Name(String),
    Full(PackageConfig),
}

impl From<PackageEntry> for PackageConfig {
    fn from(entry: PackageEntry) -> Self {
        match entry {
            PackageEntry::Name(name) => Self {
                name,
                location: None,
                main: None,
            },
            PackageEntry::Full(config) => config,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawModuleConfig {
    base_url: String,
    paths: IndexMap<String, String>,
    packages: Vec<PackageEntry>,
    combine: IndexMap<String, CombineSetting>,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    /// Project-relative directory of the config file
    config_dir: String,
    /// Project-relative module base directory
    pub base_url: String,
    pub paths: IndexMap<String, String>,
    pub packages: Vec<PackageConfig>,
    pub combine: IndexMap<String, CombineSetting>,
}

impl ModuleConfig {
    /// Read `config_path` (relative to `base_dir`)
    pub fn load(base_dir: &Path, config_path: &str) -> Result<Self> {
        let full_path = base_dir.join(config_path);
        let content = std::fs::read_to_string(&full_path)
            .with_context(|| format!("Failed to read module config {}", full_path.display()))?;
        let config = Self::from_json(&content, config_path)
            .with_context(|| format!("Failed to parse module config {}", full_path.display()))?;
        debug!(
            "Loaded module config {config_path}: baseUrl={}, {} paths, {} packages",
            config.base_url,
            config.paths.len(),
            config.packages.len()
        );
        Ok(config)
    }

    /// Parse a config document located at the project-relative `config_path`
    pub fn from_json(content: &str, config_path: &str) -> Result<Self> {
        let raw: RawModuleConfig = serde_json::from_str(content)?;
        let config_path = normalize_path(config_path).unwrap_or_else(|| config_path.to_owned());
        let config_dir = dirname(&config_path).to_owned();
        let base_url = normalize_join(&config_dir, &raw.base_url)
            .with_context(|| format!("baseUrl '{}' escapes the project root", raw.base_url))?;

        Ok(Self {
            config_dir,
            base_url,
            paths: raw.paths,
            packages: raw.packages.into_iter().map(PackageConfig::from).collect(),
            combine: raw.combine,
        })
    }

    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    pub fn package(&self, name: &str) -> Option<&PackageConfig> {
        self.packages.iter().find(|package| package.name == name)
    }

    /// Combine setting configured for `module_id`, if any
    pub fn combine_setting(&self, module_id: &str) -> Option<&CombineSetting> {
        self.combine.get(module_id)
    }
}

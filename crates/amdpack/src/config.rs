use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use etcetera::{BaseStrategy, choose_base_strategy};
use log::debug;
use serde::Deserialize;
use toml::{Table, Value};

use crate::{
    module_config::DEFAULT_MODULE_CONFIG, module_parser::DEFAULT_WRAPPER, pattern_gate::PatternList,
};

/// File name of the project configuration, looked up in the project root
pub const PROJECT_CONFIG_FILE: &str = "amdpack.toml";

pub const ENV_MODULE_CONFIG: &str = "AMDPACK_MODULE_CONFIG";
pub const ENV_OUTPUT_DIR: &str = "AMDPACK_OUTPUT_DIR";

/// Build configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Module configuration (JSON), relative to the project root
    pub module_config: String,

    /// Build output directory, relative to the project root unless absolute
    pub output_dir: PathBuf,

    /// Paths never loaded into the build
    pub exclude: PatternList,

    pub module_compiler: ModuleCompilerConfig,

    pub css_importer: CssImporterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            module_config: DEFAULT_MODULE_CONFIG.to_owned(),
            output_dir: PathBuf::from("output"),
            exclude: PatternList::from_iter(["output/*", ".git/*", "node_modules/*"]),
            module_compiler: ModuleCompilerConfig::default(),
            css_importer: CssImporterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModuleCompilerConfig {
    /// Extensions of files scanned for entry modules
    pub entry_extnames: ExtnameList,

    /// Identifier of the module wrapper call
    pub wrapper: String,

    pub exclude: PatternList,

    pub include: PatternList,
}

impl Default for ModuleCompilerConfig {
    fn default() -> Self {
        Self {
            entry_extnames: ExtnameList::from_iter(["html", "htm", "phtml", "tpl", "vm"]),
            wrapper: DEFAULT_WRAPPER.to_owned(),
            exclude: PatternList::default(),
            include: PatternList::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CssImporterConfig {
    /// Extensions of stylesheets whose imports are inlined
    pub extnames: ExtnameList,

    pub exclude: PatternList,

    pub include: PatternList,
}

impl Default for CssImporterConfig {
    fn default() -> Self {
        Self {
            extnames: ExtnameList::from_iter(["css", "less"]),
            exclude: PatternList::default(),
            include: PatternList::default(),
        }
    }
}

/// File extensions, written either as a list or as one comma separated string
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawExtnames")]
pub struct ExtnameList(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawExtnames {
    Joined(String),
    List(Vec<String>),
}

impl From<RawExtnames> for ExtnameList {
    fn from(raw: RawExtnames) -> Self {
        match raw {
            RawExtnames::Joined(joined) => joined.split(',').collect(),
            RawExtnames::List(list) => list.into_iter().collect(),
        }
    }
}

impl<S: AsRef<str>> FromIterator<S> for ExtnameList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|ext| ext.as_ref().trim().to_owned())
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }
}

impl ExtnameList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Config {
    /// Load configuration for `project_dir`.
    ///
    /// Precedence, lowest first: defaults, user config, project config (or
    /// `explicit` when given), environment variables. CLI flags are applied
    /// by the caller on the returned value.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let user_config = user_config_path();
        Self::load_with_user_config(project_dir, explicit, user_config.as_deref())
    }

    pub fn load_with_user_config(
        project_dir: &Path,
        explicit: Option<&Path>,
        user_config: Option<&Path>,
    ) -> Result<Self> {
        let mut merged = Table::new();

        if let Some(user_config) = user_config
            && user_config.is_file()
        {
            debug!("Loading user config from {}", user_config.display());
            merge_tables(&mut merged, read_table(user_config)?);
        }

        let project_config = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Some(project_dir.join(PROJECT_CONFIG_FILE)).filter(|path| path.is_file()),
        };
        if let Some(project_config) = project_config {
            debug!("Loading project config from {}", project_config.display());
            merge_tables(&mut merged, read_table(&project_config)?);
        }

        let mut config: Self = Value::Table(merged)
            .try_into()
            .context("Invalid amdpack configuration")?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(module_config) = env_value(ENV_MODULE_CONFIG) {
            debug!("{ENV_MODULE_CONFIG} overrides module config: {module_config}");
            self.module_config = module_config;
        }
        if let Some(output_dir) = env_value(ENV_OUTPUT_DIR) {
            debug!("{ENV_OUTPUT_DIR} overrides output directory: {output_dir}");
            self.output_dir = PathBuf::from(output_dir);
        }
    }

    /// Absolute output directory for a build of `project_dir`
    pub fn output_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.output_dir)
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// `<config dir>/amdpack/amdpack.toml` of the current user
pub fn user_config_path() -> Option<PathBuf> {
    let strategy = choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("amdpack").join(PROJECT_CONFIG_FILE))
}

fn read_table(path: &Path) -> Result<Table> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Overlay `overlay` onto `base`; nested tables merge key by key
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(nested)) => merge_tables(existing, nested),
            (Some(slot), value) => *slot = value,
            (None, value) => {
                base.insert(key, value);
            }
        }
    }
}

//! Mapping between project files and AMD module ids.
//!
//! Every configured base (`baseUrl`, each `paths` entry, each package location)
//! becomes a [`ModuleRoot`]: a module id prefix paired with a project-relative
//! directory. File to id picks the root with the longest directory containing
//! the file; id to file picks the root with the longest id prefix.

use std::{cell::RefCell, path::Path};

use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, trace};

use crate::{
    module_config::ModuleConfig,
    util::{dirname, normalize_join, strip_dir_prefix},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RootKind {
    BaseUrl,
    Path,
    Package { main: String },
}

#[derive(Debug, Clone)]
struct ModuleRoot {
    /// Module id prefix, empty for `baseUrl`
    prefix: String,
    /// Project-relative directory (or file stem for a `paths` entry naming a file)
    dir: String,
    kind: RootKind,
}

impl ModuleRoot {
    /// Whether `module_id` is addressed through this root
    fn claims(&self, module_id: &str) -> bool {
        match self.kind {
            RootKind::BaseUrl => true,
            _ => {
                module_id == self.prefix
                    || module_id
                        .strip_prefix(self.prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// Resolve relative ids (`./x`, `../x`) against the directory of `base_id`.
/// Absolute ids are returned unchanged.
pub fn normalize_module_id(module_id: &str, base_id: &str) -> String {
    if !(module_id.starts_with("./") || module_id.starts_with("../")) {
        return module_id.to_owned();
    }
    normalize_join(dirname(base_id), module_id).unwrap_or_else(|| {
        debug!("Relative module id '{module_id}' escapes above '{base_id}'");
        module_id.to_owned()
    })
}

#[derive(Debug)]
pub struct ModuleResolver {
    config: ModuleConfig,
    roots: Vec<ModuleRoot>,
    /// Cache of id -> project-relative file path
    file_cache: RefCell<IndexMap<String, String>>,
}

impl ModuleResolver {
    pub fn new(config: ModuleConfig) -> Self {
        let mut roots = vec![ModuleRoot {
            prefix: String::new(),
            dir: config.base_url.clone(),
            kind: RootKind::BaseUrl,
        }];

        for (prefix, location) in &config.paths {
            let Some(dir) = normalize_join(&config.base_url, location) else {
                debug!("Ignoring paths entry '{prefix}': '{location}' escapes the project root");
                continue;
            };
            roots.push(ModuleRoot {
                prefix: prefix.clone(),
                dir,
                kind: RootKind::Path,
            });
        }

        for package in &config.packages {
            let Some(dir) = normalize_join(&config.base_url, package.location()) else {
                debug!(
                    "Ignoring package '{}': location '{}' escapes the project root",
                    package.name,
                    package.location()
                );
                continue;
            };
            roots.push(ModuleRoot {
                prefix: package.name.clone(),
                dir,
                kind: RootKind::Package {
                    main: package.main().to_owned(),
                },
            });
        }

        Self {
            config,
            roots,
            file_cache: RefCell::new(IndexMap::new()),
        }
    }

    /// Load `module_config_path` (relative to `base_dir`) and build a resolver from it
    pub fn from_config_file(base_dir: &Path, module_config_path: &str) -> Result<Self> {
        Ok(Self::new(ModuleConfig::load(base_dir, module_config_path)?))
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Module id of the project-relative `file_path`, or `None` when the file
    /// is not a `.js` file under any module root
    pub fn resolve_id(&self, file_path: &str) -> Option<String> {
        let stem = file_path.strip_suffix(".js")?;

        let (root, rest) = self
            .roots
            .iter()
            .filter_map(|root| strip_dir_prefix(stem, &root.dir).map(|rest| (root, rest)))
            // Later roots are more specific on ties: paths and packages beat baseUrl
            .max_by_key(|(root, _)| root.dir.len())?;

        let id = match (root.prefix.is_empty(), rest.is_empty()) {
            (true, true) => return None,
            (true, false) => rest.to_owned(),
            (false, true) => root.prefix.clone(),
            (false, false) => format!("{}/{rest}", root.prefix),
        };
        trace!("{file_path} -> module '{id}'");
        Some(id)
    }

    /// Project-relative file path of `module_id`.
    ///
    /// Unknown ids still produce a path; it simply has no registry entry.
    pub fn resolve_file(&self, module_id: &str) -> String {
        if let Some(cached) = self.file_cache.borrow().get(module_id) {
            return cached.clone();
        }

        let path = self.compute_file(module_id);
        trace!("module '{module_id}' -> {path}");
        self.file_cache
            .borrow_mut()
            .insert(module_id.to_owned(), path.clone());
        path
    }

    fn compute_file(&self, module_id: &str) -> String {
        let root = self
            .roots
            .iter()
            .filter(|root| root.claims(module_id))
            .max_by_key(|root| root.prefix.len())
            .unwrap_or(&self.roots[0]);

        let rest = module_id
            .strip_prefix(root.prefix.as_str())
            .map_or(module_id, |rest| rest.trim_start_matches('/'));

        let relative = match (&root.kind, rest.is_empty()) {
            (RootKind::Package { main }, true) => main.clone(),
            (_, true) => String::new(),
            (_, false) => rest.to_owned(),
        };

        let stem = if relative.is_empty() {
            root.dir.clone()
        } else {
            normalize_join(&root.dir, &relative)
                .unwrap_or_else(|| format!("{}/{relative}", root.dir))
        };
        format!("{stem}.js")
    }

    /// Id of the main module when `module_id` names a package
    pub fn package_main(&self, module_id: &str) -> Option<String> {
        self.config
            .package(module_id)
            .map(|package| format!("{}/{}", package.name, package.main()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn resolver() -> ModuleResolver {
        let config = ModuleConfig::from_json(
            r#"{
                "baseUrl": "src",
                "paths": { "net": "../lib/net", "jquery": "../lib/jquery-1.9.1" },
                "packages": [
                    { "name": "er", "location": "../dep/er/3.0.2/src", "main": "main" },
                    { "name": "er/ext", "location": "../dep/er-ext/src", "main": "index" }
                ]
            }"#,
            "module.conf",
        )
        .expect("valid config");
        ModuleResolver::new(config)
    }

    #[test]
    fn test_resolve_id_from_base_url() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_id("src/foo.js").as_deref(), Some("foo"));
        assert_eq!(resolver.resolve_id("src/io/File.js").as_deref(), Some("io/File"));
    }

    #[test]
    fn test_resolve_id_prefers_longest_root() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve_id("dep/er/3.0.2/src/main.js").as_deref(),
            Some("er/main")
        );
        assert_eq!(
            resolver.resolve_id("dep/er-ext/src/index.js").as_deref(),
            Some("er/ext/index")
        );
        assert_eq!(resolver.resolve_id("lib/net/Http.js").as_deref(), Some("net/Http"));
        assert_eq!(resolver.resolve_id("lib/jquery-1.9.1.js").as_deref(), Some("jquery"));
    }

    #[test]
    fn test_resolve_id_outside_roots() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_id("tool/build.js"), None);
        assert_eq!(resolver.resolve_id("src/style.css"), None);
    }

    #[test]
    fn test_resolve_file() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_file("foo"), "src/foo.js");
        assert_eq!(resolver.resolve_file("net/Http"), "lib/net/Http.js");
        assert_eq!(resolver.resolve_file("jquery"), "lib/jquery-1.9.1.js");
        assert_eq!(resolver.resolve_file("er"), "dep/er/3.0.2/src/main.js");
        assert_eq!(resolver.resolve_file("er/View"), "dep/er/3.0.2/src/View.js");
        assert_eq!(resolver.resolve_file("er/ext"), "dep/er-ext/src/index.js");
        assert_eq!(resolver.resolve_file("er/ext/Tip"), "dep/er-ext/src/Tip.js");
        // a prefix that is not a full segment does not claim the id
        assert_eq!(resolver.resolve_file("network"), "src/network.js");
    }

    #[test]
    fn test_resolve_file_is_cached() {
        let resolver = resolver();
        let first = resolver.resolve_file("er/View");
        assert_eq!(resolver.file_cache.borrow().len(), 1);
        assert_eq!(resolver.resolve_file("er/View"), first);
        assert_eq!(resolver.file_cache.borrow().len(), 1);
    }

    #[test]
    fn test_package_main() {
        let resolver = resolver();
        assert_eq!(resolver.package_main("er").as_deref(), Some("er/main"));
        assert_eq!(resolver.package_main("er/View"), None);
    }

    #[test]
    fn test_normalize_module_id() {
        assert_eq!(normalize_module_id("./View", "er/main"), "er/View");
        assert_eq!(normalize_module_id("../util/lang", "er/view/Base"), "er/util/lang");
        assert_eq!(normalize_module_id("net/Http", "er/main"), "net/Http");
        assert_eq!(normalize_module_id("../../x", "a/b"), "../../x");
    }
}

//! Dependency-aware module compilation.
//!
//! [`Bundler::compile`] turns one module's source into its output text. With
//! combining disabled only the module's own wrapper call is rewritten (id
//! inserted, dependency list made explicit). With combining enabled the
//! module's dependencies are walked depth first and every reachable module
//! definition is emitted before the modules that need it, each exactly once.
//!
//! Failures never abort a bundle. A dependency that cannot be resolved, is
//! excluded, or whose source is not a module simply contributes no text.

use log::debug;

use crate::{
    file_registry::FileRegistry,
    module_config::CombineSetting,
    module_graph::DependencyGraph,
    module_parser::{DEFAULT_WRAPPER, ModuleDefinition, ParsedSource, parse_module, quote},
    module_resolver::{ModuleResolver, normalize_module_id},
    pattern_gate::RuleSet,
    util::FxIndexSet,
};

/// Separator between module definitions in a combined bundle
const BLOCK_SEPARATOR: &str = "\n\n";

/// Whether, and which, dependencies are inlined into a module's output
#[derive(Debug, Clone, Default)]
pub enum CombinePolicy {
    #[default]
    Disabled,
    All,
    Rules(RuleSet),
}

impl CombinePolicy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Whether `module_id` must be left out of a combined bundle
    pub fn excludes(&self, module_id: &str) -> bool {
        match self {
            Self::Rules(rules) => rules.is_excluded(module_id),
            Self::Disabled | Self::All => false,
        }
    }
}

impl From<&CombineSetting> for CombinePolicy {
    fn from(setting: &CombineSetting) -> Self {
        match setting {
            CombineSetting::Enabled(true) => Self::All,
            CombineSetting::Enabled(false) => Self::Disabled,
            CombineSetting::Rules { exclude, include } => Self::Rules(RuleSet::new(exclude, include)),
        }
    }
}

impl From<bool> for CombinePolicy {
    fn from(enabled: bool) -> Self {
        if enabled { Self::All } else { Self::Disabled }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// The source holds no module definition; leave the file untouched
    NotAModule,
    Compiled(String),
}

impl CompileOutcome {
    pub fn into_code(self) -> Option<String> {
        match self {
            Self::NotAModule => None,
            Self::Compiled(code) => Some(code),
        }
    }
}

/// State of one top-level compile request
#[derive(Debug, Default)]
pub struct BundleContext {
    policy: CombinePolicy,
    /// Module ids already emitted (or deliberately skipped) in this bundle
    visited: FxIndexSet<String>,
    graph: DependencyGraph,
}

impl BundleContext {
    pub fn new(policy: CombinePolicy) -> Self {
        Self {
            policy,
            visited: FxIndexSet::default(),
            graph: DependencyGraph::new(),
        }
    }

    /// Mark `module_id` visited; `false` if it already was
    pub fn mark_visited(&mut self, module_id: &str) -> bool {
        if self.visited.contains(module_id) {
            return false;
        }
        self.visited.insert(module_id.to_owned())
    }

    pub fn is_visited(&self, module_id: &str) -> bool {
        self.visited.contains(module_id)
    }

    /// Visited ids in first-visit order
    pub fn visited(&self) -> impl Iterator<Item = &str> {
        self.visited.iter().map(String::as_str)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
}

/// Compiles modules against a file registry and module configuration
#[derive(Debug)]
pub struct Bundler<'a> {
    registry: &'a FileRegistry,
    resolver: &'a ModuleResolver,
    wrapper: String,
}

impl<'a> Bundler<'a> {
    pub fn new(registry: &'a FileRegistry, resolver: &'a ModuleResolver) -> Self {
        Self {
            registry,
            resolver,
            wrapper: DEFAULT_WRAPPER.to_owned(),
        }
    }

    /// Use a wrapper identifier other than `define`
    #[must_use]
    pub fn with_wrapper(mut self, wrapper: impl Into<String>) -> Self {
        self.wrapper = wrapper.into();
        self
    }

    /// Compile `source` as module `module_id` in a fresh bundle context
    pub fn compile(&self, module_id: &str, source: &str, policy: CombinePolicy) -> CompileOutcome {
        let mut ctx = BundleContext::new(policy);
        let outcome = self.compile_with_context(module_id, source, &mut ctx);

        if ctx.graph.has_cycles() {
            debug!(
                "Bundle for '{module_id}' contains circular dependencies: {:?}",
                ctx.graph.cycles()
            );
        }
        outcome
    }

    /// Compile the top-level module of a bundle.
    ///
    /// The top-level module is never subject to the exclude rules. When
    /// `module_id` names a package, `source` is the package's main module,
    /// which is emitted under its own id followed by the package alias.
    pub fn compile_with_context(
        &self,
        module_id: &str,
        source: &str,
        ctx: &mut BundleContext,
    ) -> CompileOutcome {
        ctx.mark_visited(module_id);
        ctx.graph.add_module(module_id);

        let Some(main_id) = self.resolver.package_main(module_id) else {
            return self.compile_root(module_id, source, ctx);
        };

        ctx.graph.add_dependency(module_id, &main_id);
        match self.compile_root(&main_id, source, ctx) {
            CompileOutcome::NotAModule => CompileOutcome::NotAModule,
            CompileOutcome::Compiled(main) => {
                CompileOutcome::Compiled(join_blocks([main, self.package_alias(module_id, &main_id)]))
            }
        }
    }

    fn compile_root(&self, module_id: &str, source: &str, ctx: &mut BundleContext) -> CompileOutcome {
        ctx.mark_visited(module_id);
        match parse_module(source, &self.wrapper) {
            ParsedSource::NotAModule => CompileOutcome::NotAModule,
            ParsedSource::Module(definition) => {
                CompileOutcome::Compiled(self.transform(module_id, &definition, ctx))
            }
        }
    }

    /// Text of `module_id` and its not yet visited dependencies, or `None`
    /// when the module was already visited or contributes nothing
    pub fn bundle(&self, module_id: &str, ctx: &mut BundleContext) -> Option<String> {
        if !ctx.mark_visited(module_id) {
            return None;
        }

        if ctx.policy.excludes(module_id) {
            debug!("Excluding '{module_id}' from the bundle");
            return None;
        }

        if let Some(main_id) = self.resolver.package_main(module_id) {
            return self.bundle_package(module_id, &main_id, ctx);
        }

        let path = self.resolver.resolve_file(module_id);
        let Some(file) = self.registry.get(&path) else {
            debug!("Dropping dependency '{module_id}': {path} is not part of the project");
            return None;
        };

        match parse_module(file.raw_data(), &self.wrapper) {
            ParsedSource::NotAModule => {
                debug!("Dropping dependency '{module_id}': {path} is not a module");
                None
            }
            ParsedSource::Module(definition) => Some(self.transform(module_id, &definition, ctx)),
        }
    }

    fn bundle_package(&self, package: &str, main_id: &str, ctx: &mut BundleContext) -> Option<String> {
        ctx.graph.add_dependency(package, main_id);
        let main_seen_before = ctx.is_visited(main_id);
        let main = self.bundle(main_id, ctx);

        if main.is_none() && !main_seen_before {
            debug!("Dropping package '{package}': main module '{main_id}' is unavailable");
            return None;
        }

        let alias = self.package_alias(package, main_id);
        Some(match main {
            Some(main) => join_blocks([main, alias]),
            None => alias,
        })
    }

    /// Emit `definition` as `module_id`, preceded by its dependencies when combining
    fn transform(&self, module_id: &str, definition: &ModuleDefinition, ctx: &mut BundleContext) -> String {
        let own = definition.render(module_id, &self.wrapper);
        if !ctx.policy.is_enabled() {
            return own;
        }

        let mut blocks = Vec::new();
        for dependency in definition.dependency_ids() {
            let dependency = normalize_module_id(&dependency, module_id);
            ctx.graph.add_dependency(module_id, &dependency);
            if let Some(text) = self.bundle(&dependency, ctx) {
                blocks.push(text);
            }
        }
        blocks.push(own);
        join_blocks(blocks)
    }

    fn package_alias(&self, package: &str, main_id: &str) -> String {
        format!(
            "{}({}, [{}], function (main) {{ return main; }});",
            self.wrapper,
            quote(package),
            quote(main_id)
        )
    }
}

fn join_blocks<I>(blocks: I) -> String
where
    I: IntoIterator<Item = String>,
{
    blocks
        .into_iter()
        .map(|block| block.trim().to_owned())
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        file_registry::FileRecord, module_config::ModuleConfig, pattern_gate::PatternList,
    };

    fn fixture() -> (FileRegistry, ModuleResolver) {
        let config = ModuleConfig::from_json(r#"{ "baseUrl": "src" }"#, "module.conf")
            .expect("valid config");
        let mut registry = FileRegistry::new("/project");
        for (path, content) in [
            ("src/a/B.js", "define(function (require) { return 'B'; });"),
            (
                "src/a/C.js",
                "define(function (require) {\n    var b = require('a/B');\n    return b + ';C';\n});",
            ),
            (
                "src/a/D.js",
                "define(['./C', 'a/B', 'a/Missing', 'a/Plain'], function (c, b) { return c + b; });",
            ),
            ("src/a/Plain.js", "window.plain = true;"),
        ] {
            registry.insert(FileRecord::new(path, content));
        }
        (registry, ModuleResolver::new(config))
    }

    fn source<'r>(registry: &'r FileRegistry, path: &str) -> &'r str {
        registry.get(path).expect("fixture file").raw_data()
    }

    #[test]
    fn test_combined_blocks_match_wire_format() {
        let (registry, resolver) = fixture();
        let bundler = Bundler::new(&registry, &resolver);

        let code = bundler
            .compile("a/C", source(&registry, "src/a/C.js"), CombinePolicy::All)
            .into_code()
            .expect("module");

        assert_eq!(
            code,
            "define('a/B', ['require'], function (require) { return 'B'; });\n\n\
             define('a/C', [\n    'require',\n    'a/B'\n], function (require) {\n    var b = \
             require('a/B');\n    return b + ';C';\n});"
        );
    }

    #[test]
    fn test_unavailable_dependencies_are_dropped() {
        let (registry, resolver) = fixture();
        let bundler = Bundler::new(&registry, &resolver);

        let code = bundler
            .compile("a/D", source(&registry, "src/a/D.js"), CombinePolicy::All)
            .into_code()
            .expect("module");
        let blocks: Vec<&str> = code.split("\n\n").collect();

        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].starts_with("define('a/B'"));
        assert!(blocks[1].starts_with("define('a/C'"));
        assert!(blocks[2].starts_with("define('a/D', [\n    './C',"));
    }

    #[test]
    fn test_pre_seeded_visited_set_skips_modules() {
        let (registry, resolver) = fixture();
        let bundler = Bundler::new(&registry, &resolver);
        let mut ctx = BundleContext::new(CombinePolicy::All);
        assert!(ctx.mark_visited("a/B"));
        assert!(!ctx.mark_visited("a/B"));

        let code = bundler
            .compile_with_context("a/C", source(&registry, "src/a/C.js"), &mut ctx)
            .into_code()
            .expect("module");

        assert!(code.starts_with("define('a/C'"));
        assert_eq!(code.matches("define(").count(), 1);
        assert_eq!(ctx.visited().collect::<Vec<_>>(), vec!["a/B", "a/C"]);
        assert_eq!(ctx.graph().dependencies_of("a/C"), vec!["a/B"]);
    }

    #[test]
    fn test_bundle_returns_nothing_for_visited_module() {
        let (registry, resolver) = fixture();
        let bundler = Bundler::new(&registry, &resolver);
        let mut ctx = BundleContext::new(CombinePolicy::All);

        assert!(bundler.bundle("a/B", &mut ctx).is_some());
        assert_eq!(bundler.bundle("a/B", &mut ctx), None);
        assert_eq!(bundler.bundle("a/Plain", &mut ctx), None);
        assert!(ctx.is_visited("a/Plain"));
    }

    #[test]
    fn test_not_a_module_is_distinct_from_empty_output() {
        let (registry, resolver) = fixture();
        let bundler = Bundler::new(&registry, &resolver);

        assert_eq!(
            bundler.compile("a/Plain", source(&registry, "src/a/Plain.js"), CombinePolicy::All),
            CompileOutcome::NotAModule
        );
    }

    #[test]
    fn test_rules_policy() {
        let policy = CombinePolicy::from(&CombineSetting::Rules {
            exclude: PatternList::from_iter(["a/*"]),
            include: PatternList::from_iter(["a/B"]),
        });
        assert!(policy.is_enabled());
        assert!(policy.excludes("a/C"));
        assert!(!policy.excludes("a/B"));
        assert!(!CombinePolicy::from(false).is_enabled());
        assert!(!CombinePolicy::All.excludes("a/C"));
    }

    #[test]
    fn test_dependency_with_regex_literals_is_combined() {
        let config = ModuleConfig::from_json(r#"{ "baseUrl": "src" }"#, "module.conf")
            .expect("valid config");
        let resolver = ModuleResolver::new(config);
        let mut registry = FileRegistry::new("/project");
        registry.insert(FileRecord::new(
            "src/util.js",
            "define(function () {\n    var quotes = /['\"]/g;\n    var paren = /[(]/;\n    \
             return function (s) { return s.replace(quotes, '').split(paren); };\n});",
        ));
        let bundler = Bundler::new(&registry, &resolver);

        let code = bundler
            .compile(
                "app",
                "define(['util'], function (util) { return util('x'); });",
                CombinePolicy::All,
            )
            .into_code()
            .expect("module");
        let blocks: Vec<&str> = code.split("\n\n").collect();

        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("define('util', [], function () {\n    var quotes = /['\"]/g;"));
        assert!(blocks[0].ends_with("split(paren); };\n});"));
        assert!(blocks[1].starts_with("define('app', ['util'],"));
    }

    #[test]
    fn test_custom_wrapper() {
        let config = ModuleConfig::from_json("{}", "module.conf").expect("valid config");
        let resolver = ModuleResolver::new(config);
        let mut registry = FileRegistry::new("/project");
        registry.insert(FileRecord::new("dep.js", "def(function () { return 1; });"));
        let bundler = Bundler::new(&registry, &resolver).with_wrapper("def");

        let code = bundler
            .compile(
                "main",
                "def(['dep'], function (dep) { return dep; });",
                CombinePolicy::All,
            )
            .into_code()
            .expect("module");
        assert_eq!(
            code,
            "def('dep', [], function () { return 1; });\n\n\
             def('main', ['dep'], function (dep) { return dep; });"
        );
    }
}

//! Compiles AMD modules in place.
//!
//! A `.js` file that maps to a module id is compiled with the combine setting
//! `module.conf` gives that id. Entry files (pages and templates) are scanned
//! for the modules they load, and each of those modules is compiled in
//! combine mode so that the page needs a single request per entry.

use anyhow::Result;
use indexmap::IndexSet;
use log::{debug, warn};
use once_cell::unsync::OnceCell;

use super::Processor;
use crate::{
    bundler::{Bundler, CombinePolicy, CompileOutcome},
    config::ModuleCompilerConfig,
    entry_scanner::find_entry_modules,
    file_registry::{Concern, FileRegistry, ProcessState},
    module_config::CombineSetting,
    module_resolver::ModuleResolver,
    pattern_gate::PatternGate,
    pipeline::ProcessContext,
};

#[derive(Debug)]
pub struct ModuleCompiler {
    gate: PatternGate,
    module_config_path: String,
    entry_extnames: IndexSet<String>,
    wrapper: String,
    /// Loaded on first use; `None` when the project has no module config
    resolver: OnceCell<Option<ModuleResolver>>,
}

impl ModuleCompiler {
    pub fn new(config: &ModuleCompilerConfig, module_config_path: &str) -> Self {
        Self {
            gate: PatternGate::new(&config.exclude, &config.include),
            module_config_path: module_config_path.to_owned(),
            entry_extnames: config
                .entry_extnames
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            wrapper: config.wrapper.clone(),
            resolver: OnceCell::new(),
        }
    }

    /// Use an already loaded resolver instead of reading the module config
    #[must_use]
    pub fn with_resolver(self, resolver: ModuleResolver) -> Self {
        Self {
            resolver: OnceCell::with_value(Some(resolver)),
            ..self
        }
    }

    fn resolver(&self, registry: &FileRegistry) -> Result<Option<&ModuleResolver>> {
        let resolver = self.resolver.get_or_try_init(|| {
            let config_path = registry.base_dir().join(&self.module_config_path);
            if !config_path.is_file() {
                warn!(
                    "Module config {} not found, skipping module compilation",
                    config_path.display()
                );
                return Ok::<_, anyhow::Error>(None);
            }
            ModuleResolver::from_config_file(registry.base_dir(), &self.module_config_path)
                .map(Some)
        })?;
        Ok(resolver.as_ref())
    }

    /// Compile the module stored at `path` as `module_id` and store the result
    fn compile_file(
        &self,
        resolver: &ModuleResolver,
        registry: &mut FileRegistry,
        path: &str,
        module_id: &str,
        policy: CombinePolicy,
    ) {
        let Some(file) = registry.get(path) else {
            debug!("Entry module '{module_id}' has no file at {path}");
            return;
        };
        if file.is_processed(Concern::ModuleCombine) {
            return;
        }

        let combine = policy.is_enabled();
        let outcome = Bundler::new(registry, resolver)
            .with_wrapper(self.wrapper.as_str())
            .compile(module_id, file.raw_data(), policy);

        let CompileOutcome::Compiled(code) = outcome else {
            debug!("{path} holds no module definition, leaving it untouched");
            return;
        };
        if let Some(file) = registry.get_mut(path) {
            file.set_data(code);
            if combine {
                file.set_status(Concern::ModuleCombine, ProcessState::Processed);
            }
        }
    }
}

impl Processor for ModuleCompiler {
    fn name(&self) -> &'static str {
        "ModuleCompiler"
    }

    fn gate(&self) -> &PatternGate {
        &self.gate
    }

    fn process(&self, path: &str, ctx: &mut ProcessContext) -> Result<()> {
        let Some(resolver) = self.resolver(ctx.registry())? else {
            return Ok(());
        };
        let Some(file) = ctx.registry().get(path) else {
            return Ok(());
        };
        let extname = file.extname().to_owned();

        if extname == "js"
            && let Some(module_id) = resolver.resolve_id(file.path())
        {
            let policy = resolver
                .config()
                .combine_setting(&module_id)
                .map(CombinePolicy::from)
                .unwrap_or_default();
            self.compile_file(resolver, ctx.registry_mut(), path, &module_id, policy);
            return Ok(());
        }

        if !self.entry_extnames.contains(&extname) {
            return Ok(());
        }

        for module_id in find_entry_modules(file.data(), &extname) {
            // Entry modules are always combined; configured rules still apply
            let policy = match resolver.config().combine_setting(&module_id) {
                Some(setting @ CombineSetting::Rules { .. }) => CombinePolicy::from(setting),
                _ => CombinePolicy::All,
            };
            let module_path = resolver.resolve_file(&module_id);
            debug!("{path}: compiling entry module '{module_id}' ({module_path})");
            self.compile_file(resolver, ctx.registry_mut(), &module_path, &module_id, policy);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::Config, file_registry::FileRecord, module_config::ModuleConfig};

    const MODULE_CONF: &str = r#"{
        "baseUrl": "src",
        "combine": { "app": true }
    }"#;

    fn context(files: &[(&str, &str)]) -> ProcessContext {
        let mut registry = FileRegistry::new("/project");
        for (path, content) in files {
            registry.insert(FileRecord::new(*path, *content));
        }
        ProcessContext::new(registry)
    }

    fn compiler() -> ModuleCompiler {
        let config = Config::default();
        let module_config = ModuleConfig::from_json(MODULE_CONF, "module.conf").expect("valid config");
        ModuleCompiler::new(&config.module_compiler, &config.module_config)
            .with_resolver(ModuleResolver::new(module_config))
    }

    fn data<'c>(ctx: &'c ProcessContext, path: &str) -> &'c str {
        ctx.registry().get(path).expect("file exists").data()
    }

    #[test]
    fn test_js_file_uses_configured_combine() -> Result<()> {
        let mut ctx = context(&[
            ("src/app.js", "define(['util'], function (util) { return util; });"),
            ("src/util.js", "define(function () { return {}; });"),
        ]);
        let compiler = compiler();

        compiler.run("src/util.js", &mut ctx)?;
        compiler.run("src/app.js", &mut ctx)?;

        assert_eq!(data(&ctx, "src/util.js"), "define('util', [], function () { return {}; });");
        assert_eq!(
            data(&ctx, "src/app.js"),
            "define('util', [], function () { return {}; });\n\n\
             define('app', ['util'], function (util) { return util; });"
        );
        assert!(
            ctx.registry()
                .get("src/app.js")
                .is_some_and(|f| f.is_processed(Concern::ModuleCombine))
        );
        Ok(())
    }

    #[test]
    fn test_entry_file_combines_entry_modules_once() -> Result<()> {
        let mut ctx = context(&[
            (
                "index.html",
                "<script>require(['page'], function (page) { page.start(); });</script>",
            ),
            ("src/page.js", "define(['util'], function (util) { return util; });"),
            ("src/util.js", "define(function () { return {}; });"),
        ]);
        let compiler = compiler();

        compiler.run("index.html", &mut ctx)?;
        let combined = data(&ctx, "src/page.js").to_owned();
        compiler.run("index.html", &mut ctx)?;
        compiler.run("src/page.js", &mut ctx)?;

        assert_eq!(combined.matches("define(").count(), 2);
        assert_eq!(data(&ctx, "src/page.js"), combined);
        assert!(data(&ctx, "index.html").starts_with("<script>require(['page']"));
        Ok(())
    }

    #[test]
    fn test_missing_entry_module_does_not_stop_later_entries() -> Result<()> {
        let mut ctx = context(&[
            ("index.html", "<script>require(['missing/Mod', 'page'])</script>"),
            ("src/page.js", "define(['util'], function (util) { return util; });"),
            ("src/util.js", "define(function () { return {}; });"),
        ]);

        compiler().run("index.html", &mut ctx)?;

        assert_eq!(data(&ctx, "src/page.js").matches("define(").count(), 2);
        assert!(
            ctx.registry()
                .get("src/page.js")
                .is_some_and(|f| f.is_processed(Concern::ModuleCombine))
        );
        assert!(ctx.registry().get("src/missing/Mod.js").is_none());
        Ok(())
    }

    #[test]
    fn test_non_module_js_is_untouched() -> Result<()> {
        let mut ctx = context(&[("src/plain.js", "window.x = 1;"), ("lib.js", "define({});")]);
        let compiler = compiler();

        compiler.run("src/plain.js", &mut ctx)?;
        compiler.run("lib.js", &mut ctx)?;

        assert_eq!(data(&ctx, "src/plain.js"), "window.x = 1;");
        assert_eq!(data(&ctx, "lib.js"), "define({});");
        Ok(())
    }

    #[test]
    fn test_missing_module_config_skips_compilation() -> Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let mut registry = FileRegistry::new(temp_dir.path());
        registry.insert(FileRecord::new("src/a.js", "define(function () {});"));
        let mut ctx = ProcessContext::new(registry);
        let config = Config::default();
        let compiler = ModuleCompiler::new(&config.module_compiler, &config.module_config);

        compiler.run("src/a.js", &mut ctx)?;

        assert_eq!(data(&ctx, "src/a.js"), "define(function () {});");
        Ok(())
    }
}

//! Build processors.
//!
//! A processor rewrites files of the registry in place. The pipeline calls
//! [`Processor::run`] once per file; `run` consults the processor's
//! [`PatternGate`] before delegating to the processor-specific
//! [`Processor::process`], so no processor can skip the include/exclude check.

mod css_importer;
mod module_compiler;

use std::fmt::Debug;

use anyhow::Result;
use log::trace;

pub use self::{css_importer::CssImporter, module_compiler::ModuleCompiler};
use crate::{
    config::Config,
    file_registry::FileRecord,
    pattern_gate::PatternGate,
    pipeline::ProcessContext,
};

pub trait Processor: Debug {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Include/exclude rules configured for this processor
    fn gate(&self) -> &PatternGate;

    /// Rewrite the file at `path`. Only called for files the gate accepts.
    ///
    /// Must be safe to call repeatedly on the same file.
    fn process(&self, path: &str, ctx: &mut ProcessContext) -> Result<()>;

    fn is_excluded(&self, file: &FileRecord) -> bool {
        self.gate().is_excluded(file)
    }

    fn is_included(&self, file: &FileRecord) -> bool {
        self.gate().is_included(file)
    }

    /// Gate-checked entry point used by the pipeline
    fn run(&self, path: &str, ctx: &mut ProcessContext) -> Result<()> {
        let Some(file) = ctx.registry().get(path) else {
            return Ok(());
        };
        if self.is_excluded(file) {
            trace!("{}: skipping excluded {path}", self.name());
            return Ok(());
        }
        self.process(path, ctx)
    }
}

/// Every processor, in the order the pipeline runs them
pub fn all_processors(config: &Config) -> Vec<Box<dyn Processor>> {
    vec![
        Box::new(CssImporter::new(&config.css_importer)),
        Box::new(ModuleCompiler::new(
            &config.module_compiler,
            &config.module_config,
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{file_registry::FileRegistry, pattern_gate::PatternList};

    fn gated_config() -> Config {
        let exclude = PatternList::from_iter(["*"]);
        let include = PatternList::from_iter(["default.css"]);
        let mut config = Config::default();
        config.css_importer.exclude = exclude.clone();
        config.css_importer.include = include.clone();
        config.module_compiler.exclude = exclude;
        config.module_compiler.include = include;
        config
    }

    #[test]
    fn test_every_processor_honours_base_gate() {
        let file = FileRecord::new("data/css-compressor/default.css", "a { color: red; }");
        let other = FileRecord::new("data/css-compressor/other.css", "b { color: red; }");

        for processor in all_processors(&gated_config()) {
            assert!(processor.is_included(&file), "{}", processor.name());
            assert!(!processor.is_excluded(&file), "{}", processor.name());
            assert!(!processor.is_included(&other), "{}", processor.name());
            assert!(processor.is_excluded(&other), "{}", processor.name());
        }
    }

    #[test]
    fn test_run_skips_excluded_files() -> Result<()> {
        let mut registry = FileRegistry::new("/project");
        registry.insert(FileRecord::new("a.css", "@import 'b.css';"));
        registry.insert(FileRecord::new("b.css", "b {}"));
        let mut ctx = ProcessContext::new(registry);

        let mut config = Config::default();
        config.css_importer.exclude = PatternList::from_iter(["a.css"]);
        let importer = CssImporter::new(&config.css_importer);

        importer.run("a.css", &mut ctx)?;
        importer.run("missing.css", &mut ctx)?;
        assert_eq!(ctx.registry().get("a.css").map(FileRecord::data), Some("@import 'b.css';"));
        Ok(())
    }
}

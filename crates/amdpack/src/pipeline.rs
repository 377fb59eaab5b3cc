//! Build driver: load the project, run every processor, write the output.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    config::Config,
    file_registry::FileRegistry,
    pattern_gate::PatternSet,
    processors::{Processor, all_processors},
    util::to_slash_path,
};

/// State shared by the processors of one build
#[derive(Debug)]
pub struct ProcessContext {
    registry: FileRegistry,
}

impl ProcessContext {
    pub fn new(registry: FileRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FileRegistry {
        &mut self.registry
    }

    pub fn base_dir(&self) -> &Path {
        self.registry.base_dir()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub text_files: usize,
    pub binary_files: usize,
    pub output_dir: PathBuf,
}

#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    processors: Vec<Box<dyn Processor>>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let processors = all_processors(&config);
        Self { config, processors }
    }

    pub fn with_processors(config: Config, processors: Vec<Box<dyn Processor>>) -> Self {
        Self { config, processors }
    }

    /// Paths skipped while loading: the configured excludes plus the output directory
    fn skip_patterns(&self, base_dir: &Path) -> PatternSet {
        let mut patterns = self.config.exclude.flatten();
        let output_dir = self.config.output_path(base_dir);
        if let Ok(relative) = output_dir.strip_prefix(base_dir) {
            let relative = to_slash_path(relative);
            if !relative.is_empty() {
                patterns.push(relative);
            }
        }
        PatternSet::from_patterns(patterns)
    }

    pub fn load(&self, base_dir: &Path) -> Result<ProcessContext> {
        let registry = FileRegistry::load(base_dir, &self.skip_patterns(base_dir))?;
        Ok(ProcessContext::new(registry))
    }

    /// Run each processor over every file, processors in order
    pub fn process(&self, ctx: &mut ProcessContext) -> Result<()> {
        let paths = ctx.registry().paths();
        for processor in &self.processors {
            let started = Instant::now();
            for path in &paths {
                processor
                    .run(path, ctx)
                    .with_context(|| format!("{} failed on {path}", processor.name()))?;
            }
            info!("{} finished in {:.2?}", processor.name(), started.elapsed());
        }
        Ok(())
    }

    /// Write every file of `ctx` below `output_dir`
    pub fn write(&self, ctx: &ProcessContext, output_dir: &Path) -> Result<()> {
        for file in ctx.registry().iter() {
            let target = output_dir.join(file.path());
            ensure_parent(&target)?;
            fs::write(&target, file.data())
                .with_context(|| format!("Failed to write {}", target.display()))?;
        }

        for relative in ctx.registry().binary_files() {
            let source = ctx.base_dir().join(relative);
            let target = output_dir.join(relative);
            ensure_parent(&target)?;
            fs::copy(&source, &target).with_context(|| {
                format!("Failed to copy {} to {}", source.display(), target.display())
            })?;
        }
        Ok(())
    }

    pub fn build(&self, base_dir: &Path) -> Result<BuildSummary> {
        info!("Building {}", base_dir.display());
        let mut ctx = self.load(base_dir)?;
        self.process(&mut ctx)?;

        let output_dir = self.config.output_path(base_dir);
        self.write(&ctx, &output_dir)?;

        let summary = BuildSummary {
            text_files: ctx.registry().len(),
            binary_files: ctx.registry().binary_files().len(),
            output_dir,
        };
        info!(
            "Wrote {} files ({} copied verbatim) to {}",
            summary.text_files + summary.binary_files,
            summary.binary_files,
            summary.output_dir.display()
        );
        Ok(summary)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        debug!("Creating {}", parent.display());
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_output_dir_is_never_loaded() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("dist/css"))?;
        fs::write(root.join("dist/css/old.css"), "old {}")?;
        fs::write(root.join("app.css"), "app {}")?;

        let config = Config {
            output_dir: PathBuf::from("dist"),
            ..Config::default()
        };
        let ctx = Pipeline::new(config).load(root)?;

        assert_eq!(ctx.registry().paths(), vec!["app.css".to_owned()]);
        assert_eq!(ctx.base_dir(), root);
        Ok(())
    }

    #[test]
    fn test_process_without_processors_keeps_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("a.css"), "@import 'b.css';")?;
        fs::write(root.join("b.css"), "b {}")?;

        let pipeline = Pipeline::with_processors(Config::default(), Vec::new());
        let summary = pipeline.build(root)?;

        assert_eq!(summary.text_files, 2);
        assert_eq!(fs::read_to_string(root.join("output/a.css"))?, "@import 'b.css';");
        Ok(())
    }
}

//! Inlines relative `@import` directives of stylesheets.
//!
//! Imported stylesheets are inlined recursively and each file is rewritten at
//! most once per build. An import cycle is cut where it closes: the directive
//! pointing back at a stylesheet that is still being inlined stays as written.

use anyhow::Result;
use log::debug;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::Processor;
use crate::{
    config::CssImporterConfig,
    file_registry::{Concern, FileRegistry, ProcessState},
    pattern_gate::PatternGate,
    pipeline::ProcessContext,
    util::{dirname, normalize_join},
};

/// `@import 'x';`, `@import "x"`, `@import url(x);`, `@import url('x')`
static IMPORT_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"@import\s+(?:url\(\s*)?(?:'([^']*)'|"([^"]*)"|([^'"\s;)]+))[ \t]*\)?[ \t]*;?"#,
    )
    .expect("import directive pattern is valid")
});

/// Remote, protocol-relative, root-absolute and data URLs are never inlined
fn is_relative_url(url: &str) -> bool {
    if url.is_empty() || url.starts_with('/') || url.starts_with('#') {
        return false;
    }
    let scheme_end = url.find(':');
    let first_separator = url.find(['/', '?', '#']);
    match (scheme_end, first_separator) {
        (Some(colon), Some(sep)) => colon > sep,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

fn import_target<'c>(captures: &Captures<'c>) -> Option<&'c str> {
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .or_else(|| captures.get(3))
        .map(|m| m.as_str().trim())
}

#[derive(Debug)]
pub struct CssImporter {
    gate: PatternGate,
    extnames: Vec<String>,
}

impl CssImporter {
    pub fn new(config: &CssImporterConfig) -> Self {
        Self {
            gate: PatternGate::new(&config.exclude, &config.include),
            extnames: config
                .extnames
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Inline the imports of `path`, recursing into imported stylesheets first
    pub fn inline(path: &str, registry: &mut FileRegistry) {
        let Some(file) = registry.get_mut(path) else {
            return;
        };
        if file.status(Concern::CssImport) != ProcessState::Unprocessed {
            return;
        }
        file.set_status(Concern::CssImport, ProcessState::InProgress);

        let path = file.path().to_owned();
        let data = file.data().to_owned();
        let dir = dirname(&path);

        let mut output = String::with_capacity(data.len());
        let mut last_end = 0;
        for captures in IMPORT_DIRECTIVE.captures_iter(&data) {
            let Some(directive) = captures.get(0) else {
                continue;
            };
            output.push_str(&data[last_end..directive.start()]);

            let inlined = import_target(&captures)
                .and_then(|url| Self::inline_target(&path, dir, url, registry));
            output.push_str(inlined.as_deref().unwrap_or(directive.as_str()));
            last_end = directive.end();
        }
        output.push_str(&data[last_end..]);

        if let Some(file) = registry.get_mut(&path) {
            file.set_data(output);
            file.set_status(Concern::CssImport, ProcessState::Processed);
        }
    }

    fn inline_target(
        importer: &str,
        dir: &str,
        url: &str,
        registry: &mut FileRegistry,
    ) -> Option<String> {
        if !is_relative_url(url) {
            debug!("{importer}: keeping non-relative import '{url}'");
            return None;
        }
        let Some(target) = normalize_join(dir, url) else {
            debug!("{importer}: import '{url}' points outside the project");
            return None;
        };

        match registry.get(&target)?.status(Concern::CssImport) {
            ProcessState::InProgress => {
                debug!("{importer}: import cycle through {target}, keeping directive");
                return None;
            }
            ProcessState::Unprocessed => Self::inline(&target, registry),
            ProcessState::Processed => {}
        }

        registry.get(&target).map(|file| file.data().to_owned())
    }
}

impl Processor for CssImporter {
    fn name(&self) -> &'static str {
        "CssImporter"
    }

    fn gate(&self) -> &PatternGate {
        &self.gate
    }

    fn process(&self, path: &str, ctx: &mut ProcessContext) -> Result<()> {
        let matches_extname = ctx
            .registry()
            .get(path)
            .is_some_and(|file| self.extnames.iter().any(|ext| ext == file.extname()));
        if matches_extname {
            Self::inline(path, ctx.registry_mut());
        }
        Ok(())
    }
}

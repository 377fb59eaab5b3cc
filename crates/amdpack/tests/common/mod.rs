#![allow(dead_code)]

use std::path::{Path, PathBuf};

use amdpack::{
    bundler::{Bundler, CombinePolicy, CompileOutcome},
    file_registry::FileRegistry,
    module_resolver::ModuleResolver,
    pattern_gate::PatternSet,
};

pub fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/dummy-project")
}

/// Registry and resolver over the dummy project
pub fn load_project() -> (FileRegistry, ModuleResolver) {
    let base_dir = fixture_dir();
    let registry =
        FileRegistry::load(&base_dir, &PatternSet::default()).expect("fixture project loads");
    let resolver =
        ModuleResolver::from_config_file(&base_dir, "module.conf").expect("fixture module.conf");
    (registry, resolver)
}

/// Compile the module stored at `path` as `module_id`
pub fn compile(
    registry: &FileRegistry,
    resolver: &ModuleResolver,
    path: &str,
    module_id: &str,
    policy: CombinePolicy,
) -> CompileOutcome {
    let source = registry.get(path).expect("fixture file").raw_data();
    Bundler::new(registry, resolver).compile(module_id, source, policy)
}

pub fn blocks(code: &str) -> Vec<&str> {
    code.split("\n\n").collect()
}

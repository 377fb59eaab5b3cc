use std::hint::black_box;

use amdpack::{
    bundler::{Bundler, CombinePolicy},
    file_registry::{FileRecord, FileRegistry},
    module_config::ModuleConfig,
    module_parser::{DEFAULT_WRAPPER, parse_module},
    module_resolver::ModuleResolver,
};
use criterion::{Criterion, criterion_group, criterion_main};

const MODULES: usize = 200;

/// Module `m/N` requires the next three modules, so the graph is wide and deep
fn synthetic_project() -> (FileRegistry, ModuleResolver) {
    let mut registry = FileRegistry::new("/bench");
    for index in 0..MODULES {
        let requires: String = (index + 1..(index + 4).min(MODULES))
            .map(|dep| format!("    var m{dep} = require('m/{dep}');\n"))
            .collect();
        registry.insert(FileRecord::new(
            format!("src/m/{index}.js"),
            format!("define(function (require) {{\n{requires}    return {index};\n}});\n"),
        ));
    }
    let config = ModuleConfig::from_json(r#"{ "baseUrl": "src" }"#, "module.conf")
        .expect("valid module config");
    (registry, ModuleResolver::new(config))
}

fn bench_parse(c: &mut Criterion) {
    let (registry, _) = synthetic_project();
    let source = registry.get("src/m/0.js").expect("module exists").raw_data().to_owned();

    c.bench_function("parse_module", |b| {
        b.iter(|| parse_module(black_box(&source), DEFAULT_WRAPPER));
    });
}

fn bench_combine(c: &mut Criterion) {
    let (registry, resolver) = synthetic_project();
    let source = registry.get("src/m/0.js").expect("module exists").raw_data();
    let bundler = Bundler::new(&registry, &resolver);

    let mut group = c.benchmark_group("combine");
    group.sample_size(20);
    group.bench_function("synthetic_graph", |b| {
        b.iter(|| bundler.compile(black_box("m/0"), black_box(source), CombinePolicy::All));
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_combine);
criterion_main!(benches);

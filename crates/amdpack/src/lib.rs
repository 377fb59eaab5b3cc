pub mod bundler;
pub mod config;
pub mod entry_scanner;
pub mod file_registry;
pub mod module_config;
pub mod module_graph;
pub mod module_parser;
pub mod module_resolver;
pub mod pattern_gate;
pub mod pipeline;
pub mod processors;
pub mod util;

//! Discovery of the modules an entry file (a page or template) loads.
//!
//! Entry files reference modules through asynchronous `require([...])` calls
//! in inline scripts, or through a `data-main` attribute on the loader's
//! script tag. Each id found is later combined into a standalone bundle.

use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;

/// Extensions whose files are markup; only their script blocks are scanned
const MARKUP_EXTNAMES: &[&str] = &["html", "htm", "tpl", "phtml", "php", "jsp", "vm"];

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").expect("script block pattern is valid")
});

static DATA_MAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bdata-main\s*=\s*(?:"([^"]+)"|'([^']+)')"#)
        .expect("data-main pattern is valid")
});

static ASYNC_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^.\w$])require\s*\(\s*\[([^\]]*)\]").expect("async require pattern is valid")
});

static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"'([^'\\]*)'|"([^"\\]*)""#).expect("string literal pattern is valid")
});

pub fn is_markup(extname: &str) -> bool {
    MARKUP_EXTNAMES.contains(&extname)
}

/// Distinct module ids referenced by `source`, in first-encountered order
pub fn find_entry_modules(source: &str, extname: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    if is_markup(extname) {
        for captures in DATA_MAIN.captures_iter(source) {
            if let Some(value) = captures.get(1).or_else(|| captures.get(2)) {
                found.push((value.start(), value.as_str().trim().to_owned()));
            }
        }
        for captures in SCRIPT_BLOCK.captures_iter(source) {
            if let Some(body) = captures.get(1) {
                collect_async_requires(body.as_str(), body.start(), &mut found);
            }
        }
    } else {
        collect_async_requires(source, 0, &mut found);
    }

    found.sort_by_key(|(offset, _)| *offset);
    found
        .into_iter()
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
        .collect::<IndexSet<String>>()
        .into_iter()
        .collect()
}

fn collect_async_requires(text: &str, base_offset: usize, found: &mut Vec<(usize, String)>) {
    for captures in ASYNC_REQUIRE.captures_iter(text) {
        let Some(list) = captures.get(1) else {
            continue;
        };
        for literal in STRING_LITERAL.captures_iter(list.as_str()) {
            if let Some(id) = literal.get(1).or_else(|| literal.get(2)) {
                found.push((base_offset + list.start() + id.start(), id.as_str().trim().to_owned()));
            }
        }
    }
}

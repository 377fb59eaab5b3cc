//! Path helpers shared by the registry, the module resolver and the CSS importer.
//!
//! All project paths handled by the core are `/`-separated and relative to the
//! project root, independent of the host platform.

use std::{hash::BuildHasherDefault, path::Path};

use cow_utils::CowUtils;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Convert a filesystem path into the `/`-separated form used as registry key
pub fn to_slash_path(path: &Path) -> String {
    path.to_string_lossy().cow_replace("\\", "/").into_owned()
}

/// Collapse `.` and `..` segments of a `/`-separated path.
///
/// Returns `None` when the path climbs above its root.
pub fn normalize_path(path: &str) -> Option<String> {
    normalize_join("", path)
}

/// Join `relative` onto the directory `base` and collapse `.`/`..` segments.
///
/// A `relative` starting with `/` restarts from the root. Returns `None` when
/// the result would escape above the root.
pub fn normalize_join(base: &str, relative: &str) -> Option<String> {
    let relative = relative.cow_replace("\\", "/");
    let mut segments: Vec<&str> = Vec::new();

    let base_segments = if relative.starts_with('/') {
        ""
    } else {
        base
    };

    for segment in base_segments.split('/').chain(relative.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    Some(segments.join("/"))
}

/// Directory part of a `/`-separated path, `""` for top-level entries
pub fn dirname(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// File name part of a `/`-separated path
pub fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Lower-cased extension without the leading dot, `""` when there is none
pub fn extname(path: &str) -> String {
    let name = basename(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.cow_to_lowercase().into_owned(),
        _ => String::new(),
    }
}

/// Whether `path` equals `dir` or lies underneath it. The empty `dir` contains everything.
pub fn strip_dir_prefix<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    if dir.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(dir)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

//! Discovery of importable modules inside a generated-source tree.
//!
//! Mirrors what a package manager does when it is pointed at `gen/<language>`:
//! walk the tree, recognise module markers for the target language and report
//! the dotted module paths that a consumer could import.

use crate::error::{ForgeError, Result};
use crate::language::TargetLanguage;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

const PYTHON_MARKER: &str = "__init__.py";
const ALWAYS_EXCLUDED: &[&str] = &["__pycache__"];

/// Include/exclude wildcard patterns applied to discovered module paths.
///
/// Patterns use fnmatch syntax: `*` matches any run of characters, `?` one
/// character, `[seq]` / `[!seq]` a character (not) in the set. So `cqc.*`
/// selects every sub-package of `cqc` but not `cqc` itself. An empty include
/// list selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl PackageFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
        patterns
            .iter()
            .map(|p| Regex::new(&fnmatch_to_regex(p)).map_err(ForgeError::from))
            .collect()
    }

    fn apply(&self, packages: BTreeSet<String>) -> Result<BTreeSet<String>> {
        let include = Self::compile(&self.include)?;
        let exclude = Self::compile(&self.exclude)?;

        Ok(packages
            .into_iter()
            .filter(|name| include.is_empty() || include.iter().any(|re| re.is_match(name)))
            .filter(|name| {
                let excluded = exclude.iter().any(|re| re.is_match(name));
                if excluded {
                    debug!("Excluding package {}", name);
                }
                !excluded
            })
            .collect())
    }
}

/// Translates an fnmatch pattern into an anchored regex.
///
/// An unterminated `[` is taken literally.
fn fnmatch_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i + 1;
                if chars.get(j) == Some(&'!') {
                    j += 1;
                }
                // A `]` right after the opening bracket is part of the set.
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                } else {
                    let mut set = &chars[i + 1..j];
                    out.push('[');
                    if set.first() == Some(&'!') {
                        out.push('^');
                        set = &set[1..];
                    }
                    for c in set {
                        if *c == '-' {
                            out.push('-');
                        } else {
                            out.push_str(&regex::escape(&c.to_string()));
                        }
                    }
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Discovers every importable module path under `root` for `language`.
///
/// # Errors
///
/// * `DiscoveryError` if `root` does not exist, is not a directory, or holds no
///   module markers for the language.
pub fn discover_packages(root: &Path, language: TargetLanguage) -> Result<BTreeSet<String>> {
    discover_packages_filtered(root, language, &PackageFilter::default())
}

/// Same as [`discover_packages`] with include/exclude patterns applied.
///
/// Filtering everything away is reported as a `DiscoveryError` as well, since
/// the resulting artifact would be empty.
pub fn discover_packages_filtered(
    root: &Path,
    language: TargetLanguage,
    filter: &PackageFilter,
) -> Result<BTreeSet<String>> {
    if !root.exists() {
        return Err(ForgeError::discovery(root, "directory does not exist"));
    }
    if !root.is_dir() {
        return Err(ForgeError::discovery(root, "path is not a directory"));
    }

    let found = match language {
        TargetLanguage::Python => python_packages(root)?,
        TargetLanguage::Rust => rust_packages(root)?,
    };
    if found.is_empty() {
        return Err(ForgeError::discovery(
            root,
            format!("no {} module markers found", language),
        ));
    }

    let packages = filter.apply(found)?;
    if packages.is_empty() {
        return Err(ForgeError::discovery(
            root,
            "every discovered package was filtered out",
        ));
    }

    info!(
        "Discovered {} {} package(s) under {}",
        packages.len(),
        language,
        root.display()
    );
    Ok(packages)
}

/// A directory is a package iff it carries `__init__.py`. Non-package
/// directories are pruned, so their children are never reported.
fn python_packages(root: &Path) -> Result<BTreeSet<String>> {
    let is_package = |entry: &DirEntry| -> bool {
        let name = entry.file_name().to_string_lossy();
        entry.file_type().is_dir()
            && !name.contains('.')
            && !ALWAYS_EXCLUDED.contains(&name.as_ref())
            && entry.path().join(PYTHON_MARKER).is_file()
    };

    let mut packages = BTreeSet::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(is_package)
    {
        let entry = entry?;
        if let Some(name) = module_path(root, entry.path(), false) {
            packages.insert(name);
        }
    }
    Ok(packages)
}

/// prost/tonic emit one `<proto.package>.rs` file per protobuf package.
fn rust_packages(root: &Path) -> Result<BTreeSet<String>> {
    let mut packages = BTreeSet::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "rs") {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if stem.is_empty() || stem.starts_with('_') || stem == "mod" || stem == "lib" {
            debug!("Skipping non-package source {}", path.display());
            continue;
        }
        if let Some(name) = module_path(root, path, true) {
            packages.insert(name);
        }
    }
    Ok(packages)
}

/// Joins the components of `path` relative to `root` with dots.
fn module_path(root: &Path, path: &Path, strip_extension: bool) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let relative = if strip_extension {
        relative.with_extension("")
    } else {
        relative.to_path_buf()
    };
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

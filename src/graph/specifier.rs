//! Specifier resolution.
//!
//! Maps the reference strings found in scripts, stylesheets and markup to
//! files on disk. Failures carry a human-readable reason; the resolver turns
//! them into [`BuildError::Resolution`](crate::build::BuildError).

use std::fs;
use std::path::{Path, PathBuf};

/// Package manifest fields consulted for a script entry, in order.
const SCRIPT_ENTRY_FIELDS: &[&str] = &["module", "main"];

/// Package manifest fields consulted for a stylesheet entry, in order.
const STYLE_ENTRY_FIELDS: &[&str] = &["sass", "style"];

/// Whether a reference points outside the project and is never followed.
///
/// Covers URLs with a scheme (`https:`, `mailto:`), protocol-relative
/// `//host` URLs, `data:` URIs, fragment-only `#id` references, template
/// placeholders and empty strings.
pub fn is_external(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') || reference.starts_with("//") {
        return true;
    }
    if reference.contains("{{") || reference.contains("<%") {
        return true;
    }
    match reference.find(':') {
        Some(colon) => {
            let scheme = &reference[..colon];
            // `C:\dir` style drive letters are paths, not schemes
            scheme.len() > 1
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Strip a `?query` and `#hash` suffix.
pub fn strip_suffix(reference: &str) -> &str {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    &reference[..end]
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".."
}

fn is_file(path: &Path) -> bool {
    path.is_file()
}

/// Append a suffix to the final path component (`util` + `.js` = `util.js`).
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Split a bare specifier into package name and optional subpath.
///
/// `lodash/fp` → (`lodash`, `fp`); `@scope/pkg/a/b` → (`@scope/pkg`, `a/b`).
pub fn split_package(specifier: &str) -> Option<(&str, Option<&str>)> {
    let segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut split_at = None;
    let mut seen = 0;
    for (i, c) in specifier.char_indices() {
        if c == '/' {
            seen += 1;
            if seen == segments {
                split_at = Some(i);
                break;
            }
        }
    }
    match split_at {
        Some(i) => {
            let (name, rest) = (&specifier[..i], &specifier[i + 1..]);
            Some((name, (!rest.is_empty()).then_some(rest)))
        }
        None if segments == 2 && seen < 1 => None,
        None => Some((specifier, None)),
    }
}

/// Find a package directory by walking ancestor `node_modules/` directories.
pub fn find_package(name: &str, from_dir: &Path) -> Option<PathBuf> {
    from_dir
        .ancestors()
        .map(|dir| dir.join("node_modules").join(name))
        .find(|candidate| candidate.is_dir())
}

/// Read the first string field present in a package's `package.json`.
fn package_field(package_dir: &Path, fields: &[&str]) -> Result<Option<String>, String> {
    let manifest = package_dir.join("package.json");
    if !manifest.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&manifest)
        .map_err(|e| format!("cannot read {}: {}", manifest.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| format!("invalid {}: {}", manifest.display(), e))?;
    Ok(fields.iter().find_map(|field| value.get(*field)?.as_str().map(str::to_string)))
}

/// Resolve a script specifier.
///
/// Relative and absolute specifiers resolve against `from_dir`; bare
/// specifiers go through the package lookup.
pub fn resolve_script(specifier: &str, from_dir: &Path) -> Result<PathBuf, String> {
    let path = Path::new(specifier);
    if is_relative(specifier) || path.is_absolute() {
        let base = from_dir.join(path);
        return script_file(&base)
            .ok_or_else(|| format!("cannot find module '{}' from {}", specifier, from_dir.display()));
    }

    let (name, subpath) =
        split_package(specifier).ok_or_else(|| format!("invalid package specifier '{}'", specifier))?;
    let package = find_package(name, from_dir)
        .ok_or_else(|| format!("cannot find package '{}' from {}", name, from_dir.display()))?;

    match subpath {
        Some(subpath) => script_file(&package.join(subpath)).ok_or_else(|| {
            format!("cannot find '{}' in package '{}'", subpath, name)
        }),
        None => package_script_entry(&package, name),
    }
}

fn package_script_entry(package: &Path, name: &str) -> Result<PathBuf, String> {
    if let Some(entry) = package_field(package, SCRIPT_ENTRY_FIELDS)? {
        if let Some(file) = script_file(&package.join(&entry)) {
            return Ok(file);
        }
        return Err(format!("package '{}' entry '{}' does not exist", name, entry));
    }
    let index = package.join("index.js");
    if is_file(&index) {
        Ok(index)
    } else {
        Err(format!("package '{}' has no entry point", name))
    }
}

/// Script candidates: exact file, `.js`, `.mjs`, then `index.js` in a directory.
fn script_file(base: &Path) -> Option<PathBuf> {
    if is_file(base) {
        return Some(base.to_path_buf());
    }
    [with_suffix(base, ".js"), with_suffix(base, ".mjs"), base.join("index.js")]
        .into_iter()
        .find(|candidate| is_file(candidate))
}

/// Resolve a stylesheet `@import` specifier.
///
/// A `~` prefix routes through the package lookup.
pub fn resolve_style_import(specifier: &str, from_dir: &Path) -> Result<PathBuf, String> {
    let specifier = strip_suffix(specifier);
    if let Some(bare) = specifier.strip_prefix('~') {
        let (name, subpath) =
            split_package(bare).ok_or_else(|| format!("invalid package specifier '{}'", bare))?;
        let package = find_package(name, from_dir)
            .ok_or_else(|| format!("cannot find package '{}' from {}", name, from_dir.display()))?;
        return match subpath {
            Some(subpath) => style_file(&package.join(subpath))
                .ok_or_else(|| format!("cannot find stylesheet '{}' in package '{}'", subpath, name)),
            None => {
                if let Some(entry) = package_field(&package, STYLE_ENTRY_FIELDS)? {
                    let entry_path = package.join(&entry);
                    if is_file(&entry_path) {
                        return Ok(entry_path);
                    }
                }
                style_file(&package.join("index"))
                    .ok_or_else(|| format!("package '{}' has no stylesheet entry", name))
            }
        };
    }

    style_file(&from_dir.join(specifier))
        .ok_or_else(|| format!("cannot find stylesheet '{}' from {}", specifier, from_dir.display()))
}

/// Stylesheet candidates: exact, `name.scss`, `_name.scss`, `name.sass`,
/// `_name.sass`, `name.css`, then the same for `index` inside a directory.
fn style_file(base: &Path) -> Option<PathBuf> {
    if is_file(base) {
        return Some(base.to_path_buf());
    }
    partial_candidates(base).into_iter().chain(partial_candidates(&base.join("index"))).find(|c| is_file(c))
}

fn partial_candidates(base: &Path) -> Vec<PathBuf> {
    let (Some(parent), Some(name)) = (base.parent(), base.file_name()) else {
        return Vec::new();
    };
    let name = name.to_string_lossy();
    let mut candidates = Vec::with_capacity(5);
    for ext in ["scss", "sass"] {
        candidates.push(parent.join(format!("{}.{}", name, ext)));
        candidates.push(parent.join(format!("_{}.{}", name, ext)));
    }
    candidates.push(parent.join(format!("{}.css", name)));
    candidates
}

/// Resolve a `url()` or markup attribute reference to an existing file.
pub fn resolve_url(reference: &str, from_dir: &Path) -> Result<PathBuf, String> {
    let reference = strip_suffix(reference);
    let path = match reference.strip_prefix('~') {
        Some(bare) => {
            let (name, subpath) =
                split_package(bare).ok_or_else(|| format!("invalid package specifier '{}'", bare))?;
            let package = find_package(name, from_dir)
                .ok_or_else(|| format!("cannot find package '{}' from {}", name, from_dir.display()))?;
            package.join(subpath.unwrap_or(""))
        }
        None => from_dir.join(reference),
    };
    if is_file(&path) {
        Ok(path)
    } else {
        Err(format!("cannot find file '{}' from {}", reference, from_dir.display()))
    }
}

//! Module specifier resolution.
//!
//! Resolves import specifiers to absolute file paths.
//!
//! ## Specifier Types
//!
//! - Aliased: `@/components/App` (alias `@` → `./src`), checked first
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `vue`, `@scope/pkg`, `vue/dist/vue.esm.js`
//!
//! A candidate without a recognized extension is probed with each configured
//! extension in order; a directory resolves to its `package.json` `main` or
//! to `index` plus an extension.

use crate::assets::KNOWN_ASSET_EXTENSIONS;
use crate::config::ResolveConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// A specifier could not be resolved.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Cannot resolve '{specifier}' (searched {} paths)", searched_paths.len())]
pub struct ResolveError {
    pub specifier: String,
    /// Every candidate path that was checked, in order.
    pub searched_paths: Vec<PathBuf>,
}

/// A single alias entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Alias {
    key: String,
    exact: bool,
    replacement: String,
}

impl Alias {
    fn apply(&self, specifier: &str) -> Option<String> {
        if self.exact {
            return (specifier == self.key).then(|| self.replacement.clone());
        }
        if specifier == self.key {
            return Some(self.replacement.clone());
        }
        let rest = specifier.strip_prefix(&self.key)?.strip_prefix('/')?;
        Some(format!("{}/{rest}", self.replacement.trim_end_matches('/')))
    }
}

/// Path resolver with alias table and extension probing.
#[derive(Debug)]
pub struct Resolver {
    root: PathBuf,
    /// Longest key first, so the longest matching prefix wins.
    aliases: Vec<Alias>,
    extensions: Vec<String>,
    cache: RwLock<HashMap<(String, PathBuf), PathBuf>>,
}

impl Resolver {
    /// Build a resolver for a project root.
    #[must_use]
    pub fn new(root: &Path, config: &ResolveConfig) -> Self {
        let mut aliases: Vec<Alias> = config
            .alias
            .iter()
            .map(|(key, replacement)| {
                let (key, exact) = match key.strip_suffix('$') {
                    Some(k) => (k.to_string(), true),
                    None => (key.trim_end_matches('/').to_string(), false),
                };
                Alias {
                    key,
                    exact,
                    replacement: replacement.clone(),
                }
            })
            .collect();
        // Stable sort keeps declaration order among equal lengths.
        aliases.sort_by(|a, b| b.key.len().cmp(&a.key.len()));

        let extensions = config
            .extensions
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| {
                if e.starts_with('.') {
                    e.clone()
                } else {
                    format!(".{e}")
                }
            })
            .collect();

        Self {
            root: root.to_path_buf(),
            aliases,
            extensions,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalized extension probe list.
    #[must_use]
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Forget cached resolutions (files may have appeared or disappeared).
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Resolve `specifier` relative to the directory `from_dir`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        let key = (specifier.to_string(), from_dir.to_path_buf());
        if let Some(hit) = self.cache.read().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }

        let mut searched = Vec::new();
        let found = self.resolve_uncached(specifier, from_dir, &mut searched);
        match found {
            Some(path) => {
                let path = dunce::canonicalize(&path).unwrap_or(path);
                if let Ok(mut cache) = self.cache.write() {
                    cache.insert(key, path.clone());
                }
                Ok(path)
            }
            None => {
                tracing::debug!(specifier, from = %from_dir.display(), "unresolved");
                Err(ResolveError {
                    specifier: specifier.to_string(),
                    searched_paths: searched,
                })
            }
        }
    }

    fn resolve_uncached(
        &self,
        specifier: &str,
        from_dir: &Path,
        searched: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        // Alias substitution takes priority over relative resolution.
        if let Some(substituted) = self.aliases.iter().find_map(|a| a.apply(specifier)) {
            return self.resolve_plain(&substituted, &self.root, searched);
        }
        self.resolve_plain(specifier, from_dir, searched)
    }

    fn resolve_plain(
        &self,
        specifier: &str,
        base: &Path,
        searched: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        if is_path_like(specifier) {
            let target = if Path::new(specifier).is_absolute() {
                PathBuf::from(specifier)
            } else {
                base.join(specifier)
            };
            return self.resolve_file_or_directory(&target, searched);
        }
        self.resolve_bare(specifier, base, searched)
    }

    /// Look a bare specifier up in `node_modules`, walking up from `from_dir`.
    fn resolve_bare(
        &self,
        specifier: &str,
        from_dir: &Path,
        searched: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        let mut current = Some(from_dir);
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(pkg_name);
            if pkg_dir.is_dir() {
                let found = match subpath {
                    Some(sub) => self.resolve_file_or_directory(&pkg_dir.join(sub), searched),
                    None => self.resolve_file_or_directory(&pkg_dir, searched),
                };
                if found.is_some() {
                    return found;
                }
            } else {
                searched.push(pkg_dir);
            }
            current = dir.parent();
        }
        None
    }

    fn resolve_file_or_directory(
        &self,
        target: &Path,
        searched: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        if let Some(file) = self.resolve_file(target, searched) {
            return Some(file);
        }
        if target.is_dir() {
            return self.resolve_directory(target, searched);
        }
        None
    }

    /// Exact file, then extension probing when the name has no recognized extension.
    fn resolve_file(&self, target: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        searched.push(target.to_path_buf());
        if target.is_file() {
            return Some(target.to_path_buf());
        }
        if self.has_recognized_extension(target) {
            return None;
        }
        for ext in &self.extensions {
            let mut probe = target.as_os_str().to_os_string();
            probe.push(ext);
            let probe = PathBuf::from(probe);
            searched.push(probe.clone());
            if probe.is_file() {
                return Some(probe);
            }
        }
        None
    }

    fn resolve_directory(&self, dir: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
        if let Some(entry) = package_entry(dir) {
            if let Some(file) = self.resolve_file(&dir.join(entry), searched) {
                return Some(file);
            }
        }
        self.resolve_file(&dir.join("index"), searched)
    }

    fn has_recognized_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| e[1..].eq_ignore_ascii_case(&ext))
            || KNOWN_ASSET_EXTENSIONS.contains(&ext.as_str())
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || Path::new(specifier).is_absolute()
}

/// Split a bare specifier into package name and subpath.
///
/// `vue/dist/vue.esm.js` → (`vue`, `dist/vue.esm.js`),
/// `@scope/pkg/x` → (`@scope/pkg`, `x`).
fn parse_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(i, _)| i)
    } else {
        specifier.find('/')
    };
    match split_at {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..]).filter(|s| !s.is_empty())),
        None => (specifier, None),
    }
}

/// Entry file declared by `package.json` (`module`, then `main`).
fn package_entry(dir: &Path) -> Option<String> {
    let source = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let pkg: serde_json::Value = serde_json::from_str(&source).ok()?;
    ["module", "main"]
        .iter()
        .find_map(|field| pkg.get(*field).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(String::from)
}

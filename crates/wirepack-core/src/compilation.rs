//! The result of one build pass.

use crate::graph::ModuleGraph;
use crate::report::{summarize, Diagnostic, DiagnosticKind, Summary};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Who produced an emitted asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOrigin {
    /// The script or style bundle.
    Bundle,
    /// An asset module (image, font, unmatched file); holds the module id.
    Module(String),
    /// An emit hook; holds the plugin name.
    Plugin(String),
    /// Copied verbatim at cold start.
    Static,
}

/// An emitted file.
#[derive(Debug, Clone)]
pub struct Asset {
    pub bytes: Arc<[u8]>,
    pub origin: AssetOrigin,
}

impl Asset {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>, origin: AssetOrigin) -> Self {
        Self {
            bytes: bytes.into(),
            origin,
        }
    }
}

/// All reachable modules, emitted assets and diagnostics of a build.
///
/// Cloning is cheap: modules and asset bytes are shared until modified.
#[derive(Debug, Clone, Default)]
pub struct Compilation {
    /// Entry module id; `None` when the entry failed to resolve.
    pub entry: Option<String>,
    pub graph: ModuleGraph,
    /// Output-relative name → file.
    pub assets: BTreeMap<String, Asset>,
    /// Top-level assets referenced by the entry document, scripts then styles.
    pub entry_assets: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    #[must_use]
    pub fn summary(&self) -> Summary<'_> {
        summarize(&self.diagnostics)
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    /// Look up an emitted asset by output-relative name.
    #[must_use]
    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.get(name.trim_start_matches('/'))
    }

    /// Add an emitted asset. A name already taken by a different origin keeps
    /// the first file and records a warning.
    pub fn emit_asset(&mut self, name: &str, asset: Asset) {
        let name = name.trim_start_matches('/').to_string();
        if let Some(existing) = self.assets.get(&name) {
            if existing.origin != asset.origin {
                self.diagnostics.push(Diagnostic::warning(
                    DiagnosticKind::Asset,
                    format!("Conflicting asset name '{name}'"),
                    format!(
                        "'{name}' is emitted by both {:?} and {:?}; keeping the first",
                        existing.origin, asset.origin
                    ),
                ));
                return;
            }
        }
        self.assets.insert(name, asset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_asset_collision_warns() {
        let mut c = Compilation::default();
        c.emit_asset("/static/a.txt", Asset::new(b"one".to_vec(), AssetOrigin::Static));
        c.emit_asset(
            "static/a.txt",
            Asset::new(b"two".to_vec(), AssetOrigin::Plugin("html".into())),
        );
        assert_eq!(&*c.asset("static/a.txt").unwrap().bytes, b"one");
        assert_eq!(c.warnings().count(), 1);
        assert!(!c.has_errors());
    }

    #[test]
    fn test_same_origin_replaces() {
        let mut c = Compilation::default();
        c.emit_asset("main.js", Asset::new(b"a".to_vec(), AssetOrigin::Bundle));
        c.emit_asset("main.js", Asset::new(b"b".to_vec(), AssetOrigin::Bundle));
        assert_eq!(&*c.asset("/main.js").unwrap().bytes, b"b");
        assert!(c.diagnostics.is_empty());
    }
}

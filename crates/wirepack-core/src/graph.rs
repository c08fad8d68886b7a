//! Module dependency graph.
//!
//! Tracks modules, their resolved dependencies and back-references for
//! bundling and incremental rebuilds. Modules are keyed by their public id
//! (root-relative path with `/` separators) and shared behind `Arc`, so a
//! staged copy of the graph only duplicates the modules it touches.

use crate::assets::extension_of;
use crate::loader::OutputKind;
use crate::report::Diagnostic;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source kind, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Script,
    Style,
    Image,
    Other,
}

impl ModuleKind {
    /// Detect from a path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match extension_of(path).as_str() {
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "vue" | "json" => Self::Script,
            "css" | "scss" | "sass" | "less" => Self::Style,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "avif" => Self::Image,
            _ => Self::Other,
        }
    }

    /// Output kind when no loader decides otherwise.
    #[must_use]
    pub fn default_output(self) -> OutputKind {
        match self {
            Self::Script => OutputKind::Script,
            Self::Style => OutputKind::Stylesheet,
            Self::Image | Self::Other => OutputKind::Asset,
        }
    }
}

/// Public id of a module: root-relative, `/`-separated.
#[must_use]
pub fn module_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|c| c != "/" && c != "\\")
        .collect::<Vec<_>>()
        .join("/")
}

/// A module in the dependency graph.
#[derive(Debug, Clone)]
pub struct Module {
    /// Public id.
    pub id: String,
    /// Resolved absolute path.
    pub path: PathBuf,
    pub kind: ModuleKind,
    /// Raw source bytes at the time of the last transform.
    pub source: Vec<u8>,
    /// Loader chain applied, in declaration order.
    pub loaders: Vec<String>,
    /// Transformed output (for assets, the script exporting the reference).
    pub output: String,
    pub output_kind: OutputKind,
    /// URL or `data:` URI standing in for an asset module.
    pub reference: Option<String>,
    /// Name of the emitted file for an asset module.
    pub emitted: Option<String>,
    /// Specifier → dependency id.
    pub dependencies: BTreeMap<String, String>,
    /// Ids of modules that depend on this one.
    pub dependents: BTreeSet<String>,
    /// Diagnostics raised while processing this module.
    pub diagnostics: Vec<Diagnostic>,
}

impl Module {
    /// The `!`-joined loader request, e.g. `style!css!sass!src/app.scss`.
    #[must_use]
    pub fn request(&self) -> String {
        if self.loaders.is_empty() {
            self.id.clone()
        } else {
            format!("{}!{}", self.loaders.join("!"), self.id)
        }
    }
}

/// The module dependency graph.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: BTreeMap<String, Arc<Module>>,
}

impl ModuleGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a module.
    ///
    /// A replaced module keeps its dependents and its dependency edges; edges
    /// only change through [`ModuleGraph::link`], which needs the old ones to
    /// drop stale back-references.
    pub fn insert(&mut self, mut module: Module) {
        if let Some(old) = self.modules.get(&module.id) {
            module.dependents.extend(old.dependents.iter().cloned());
            module.dependencies.clone_from(&old.dependencies);
        }
        self.modules.insert(module.id.clone(), Arc::new(module));
    }

    /// Get a module by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.get(id).map(AsRef::as_ref)
    }

    /// Mutable access; clones the module if it is shared.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Module> {
        self.modules.get_mut(id).map(Arc::make_mut)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// Number of modules in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Iterate over all modules in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.values().map(AsRef::as_ref)
    }

    /// Replace a module's dependency edges, keeping back-references in sync.
    pub fn link(&mut self, id: &str, dependencies: BTreeMap<String, String>) {
        let old: Vec<String> = match self.get(id) {
            Some(m) => m.dependencies.values().cloned().collect(),
            None => return,
        };
        for dep in old {
            if let Some(m) = self.get_mut(&dep) {
                m.dependents.remove(id);
            }
        }
        for dep in dependencies.values() {
            if let Some(m) = self.get_mut(dep) {
                m.dependents.insert(id.to_string());
            }
        }
        if let Some(m) = self.get_mut(id) {
            m.dependencies = dependencies;
        }
    }

    /// Ids in topological order (dependencies before dependents).
    ///
    /// Ties break by id so the order is stable. Modules on a cycle are appended
    /// in id order.
    #[must_use]
    pub fn toposort(&self) -> Vec<String> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        for module in self.modules.values() {
            let deps = module
                .dependencies
                .values()
                .filter(|d| self.modules.contains_key(d.as_str()))
                .collect::<BTreeSet<_>>()
                .len();
            in_degree.insert(module.id.as_str(), deps);
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.modules.len());
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        while let Some(id) = ready.pop_first() {
            if !placed.insert(id) {
                continue;
            }
            order.push(id.to_string());
            let Some(module) = self.modules.get(id) else {
                continue;
            };
            for dependent in &module.dependents {
                let Some(target) = self.modules.get(dependent.as_str()) else {
                    continue;
                };
                // Only real edges count down
                if !target.dependencies.values().any(|d| d == id) {
                    continue;
                }
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 && !placed.contains(dependent.as_str()) {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        // Circular imports are allowed in JS
        if order.len() < self.modules.len() {
            order.extend(
                self.modules
                    .keys()
                    .filter(|id| !placed.contains(id.as_str()))
                    .cloned(),
            );
        }
        order
    }

    /// The seeds plus every module that transitively depends on one of them.
    #[must_use]
    pub fn transitive_dependents(&self, seeds: &[String]) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = seeds.iter().map(String::as_str).collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.to_string()) {
                continue;
            }
            if let Some(module) = self.modules.get(id) {
                queue.extend(module.dependents.iter().map(String::as_str));
            }
        }
        seen
    }

    /// Drop modules no longer reachable from `entry`. Returns the removed ids.
    pub fn retain_reachable(&mut self, entry: &str) -> Vec<String> {
        let mut reachable = BTreeSet::new();
        let mut queue = VecDeque::from([entry.to_string()]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            if let Some(module) = self.modules.get(&id) {
                queue.extend(module.dependencies.values().cloned());
            }
        }

        let removed: Vec<String> = self
            .modules
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        for id in &removed {
            self.modules.remove(id);
        }
        for id in &removed {
            let dependents: Vec<String> = self
                .modules
                .values()
                .filter(|m| m.dependents.contains(id))
                .map(|m| m.id.clone())
                .collect();
            for dependent in dependents {
                if let Some(m) = self.get_mut(&dependent) {
                    m.dependents.remove(id);
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(id: &str) -> Module {
        Module {
            id: id.to_string(),
            path: PathBuf::from("/p").join(id),
            kind: ModuleKind::from_path(Path::new(id)),
            source: Vec::new(),
            loaders: Vec::new(),
            output: String::new(),
            output_kind: OutputKind::Script,
            reference: None,
            emitted: None,
            dependencies: BTreeMap::new(),
            dependents: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    fn deps(pairs: &[&str]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|id| (format!("./{id}"), (*id).to_string()))
            .collect()
    }

    fn diamond() -> ModuleGraph {
        // main -> a, b; a -> leaf; b -> leaf
        let mut graph = ModuleGraph::new();
        for id in ["main.js", "a.js", "b.js", "leaf.js"] {
            graph.insert(module(id));
        }
        graph.link("main.js", deps(&["a.js", "b.js"]));
        graph.link("a.js", deps(&["leaf.js"]));
        graph.link("b.js", deps(&["leaf.js"]));
        graph
    }

    #[test]
    fn test_module_kind_detection() {
        assert_eq!(ModuleKind::from_path(Path::new("a.tsx")), ModuleKind::Script);
        assert_eq!(ModuleKind::from_path(Path::new("a.SCSS")), ModuleKind::Style);
        assert_eq!(ModuleKind::from_path(Path::new("a.png")), ModuleKind::Image);
        assert_eq!(ModuleKind::from_path(Path::new("a.woff2")), ModuleKind::Other);
    }

    #[test]
    fn test_module_id_is_root_relative() {
        let id = module_id(Path::new("/p"), Path::new("/p/src/components/App.vue"));
        assert_eq!(id, "src/components/App.vue");
    }

    #[test]
    fn test_link_maintains_dependents() {
        let mut graph = diamond();
        let leaf = graph.get("leaf.js").unwrap();
        assert_eq!(
            leaf.dependents.iter().cloned().collect::<Vec<_>>(),
            vec!["a.js".to_string(), "b.js".to_string()]
        );

        graph.link("b.js", BTreeMap::new());
        let leaf = graph.get("leaf.js").unwrap();
        assert_eq!(leaf.dependents.len(), 1);
    }

    #[test]
    fn test_toposort_dependencies_first() {
        let order = diamond().toposort();
        assert_eq!(order, vec!["leaf.js", "a.js", "b.js", "main.js"]);
    }

    #[test]
    fn test_reinsert_keeps_edges_until_relinked() {
        let mut graph = diamond();
        graph.insert(module("b.js"));
        assert_eq!(graph.get("b.js").unwrap().dependencies, deps(&["leaf.js"]));

        graph.link("b.js", BTreeMap::new());
        let leaf = graph.get("leaf.js").unwrap();
        assert!(!leaf.dependents.contains("b.js"));
        assert_eq!(graph.toposort(), vec!["b.js", "leaf.js", "a.js", "main.js"]);
    }

    #[test]
    fn test_toposort_ignores_stale_dependents() {
        let mut graph = diamond();
        // Back-reference without a matching edge
        graph.get_mut("main.js").unwrap().dependents.insert("leaf.js".to_string());
        graph.get_mut("leaf.js").unwrap().dependents.insert("zzz.js".to_string());
        let order = graph.toposort();
        assert_eq!(order, vec!["leaf.js", "a.js", "b.js", "main.js"]);
    }

    #[test]
    fn test_toposort_with_cycle() {
        let mut graph = ModuleGraph::new();
        graph.insert(module("x.js"));
        graph.insert(module("y.js"));
        graph.link("x.js", deps(&["y.js"]));
        graph.link("y.js", deps(&["x.js"]));
        assert_eq!(graph.toposort(), vec!["x.js", "y.js"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = diamond();
        let affected = graph.transitive_dependents(&["leaf.js".to_string()]);
        assert_eq!(affected.len(), 4);
        let affected = graph.transitive_dependents(&["a.js".to_string()]);
        assert_eq!(
            affected.into_iter().collect::<Vec<_>>(),
            vec!["a.js".to_string(), "main.js".to_string()]
        );
    }

    #[test]
    fn test_retain_reachable() {
        let mut graph = diamond();
        graph.link("main.js", deps(&["a.js"]));
        let removed = graph.retain_reachable("main.js");
        assert_eq!(removed, vec!["b.js".to_string()]);
        assert_eq!(graph.get("leaf.js").unwrap().dependents.len(), 1);
    }

    #[test]
    fn test_request_string() {
        let mut m = module("src/app.scss");
        m.loaders = vec!["style".into(), "css".into(), "sass".into()];
        assert_eq!(m.request(), "style!css!sass!src/app.scss");
    }
}

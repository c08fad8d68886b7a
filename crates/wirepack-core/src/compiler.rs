//! Build passes.
//!
//! A full build walks the dependency graph breadth-first from the entry,
//! transforming each frontier in parallel and integrating the results one at
//! a time. An incremental rebuild works on a staged copy of the last good
//! [`Compilation`]: it recomputes the changed modules and everything that
//! depends on them (dependencies first), picks up newly imported modules,
//! and hands back either a committed-ready compilation plus the live updates
//! to push, or the failed attempt's diagnostics.

use crate::assets::{data_uri, render_name, DEFAULT_ASSET_NAME, DEFAULT_IMAGE_NAME};
use crate::compilation::{Asset, AssetOrigin, Compilation};
use crate::config::PipelineConfig;
use crate::emit::{json_string, script_bundle, style_bundle};
use crate::error::Error;
use crate::graph::{module_id, Module, ModuleGraph, ModuleKind};
use crate::imports::{rewrite, scan_script, scan_style, Dependency, DependencyKind};
use crate::loader::{run_chain, AssetRule, LoaderRegistry, OutputKind, RuleAction, RuleSet};
use crate::plugin::{HookFile, HookRunner};
use crate::report::{Diagnostic, DiagnosticKind};
use crate::resolve::Resolver;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One module to push to live clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleUpdate {
    /// Public module id.
    pub id: String,
    /// New output.
    pub output: String,
}

/// What connected clients should do after a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUpdate {
    /// The entry document or the module set changed.
    FullReload,
    /// Replace these modules, in dependency order. May be empty.
    Modules(Vec<ModuleUpdate>),
}

/// Result of an incremental rebuild.
#[derive(Debug)]
pub enum RebuildOutcome {
    /// No module in the graph was affected.
    Unchanged,
    /// Ready to commit.
    Updated {
        compilation: Compilation,
        update: LiveUpdate,
    },
    /// The attempt had errors; the previous compilation stays in service.
    Failed(Compilation),
}

/// A reference in a module's output to patch once its target is known.
#[derive(Debug, Clone)]
struct PendingRewrite {
    specifier: String,
    kind: DependencyKind,
    span: Range<usize>,
    statement: Range<usize>,
}

/// One transformed module plus its resolved dependency paths.
struct Processed {
    module: Module,
    dependencies: Vec<(String, PathBuf)>,
    rewrites: Vec<PendingRewrite>,
}

impl Processed {
    fn leaf(module: Module) -> Self {
        Self {
            module,
            dependencies: Vec::new(),
            rewrites: Vec::new(),
        }
    }
}

/// Transforms modules and assembles compilations.
#[derive(Debug)]
pub struct Compiler {
    root: PathBuf,
    config: PipelineConfig,
    resolver: Resolver,
    rules: RuleSet,
    hooks: HookRunner,
    /// Files staged by before-run hooks, merged into every compilation.
    staged: Vec<HookFile>,
    /// Cold-start failures, reported with the next build.
    pending: Mutex<Vec<Diagnostic>>,
}

impl Compiler {
    /// Compile the configuration into a ready compiler.
    ///
    /// Fails on invalid rules and unknown loader names.
    pub fn new(
        root: &Path,
        config: PipelineConfig,
        registry: &LoaderRegistry,
        hooks: HookRunner,
    ) -> Result<Self, Error> {
        let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let rules = RuleSet::compile(&config.module.rules, registry)?;
        let resolver = Resolver::new(&root, &config.resolve);
        Ok(Self {
            root,
            config,
            resolver,
            rules,
            hooks,
            staged: Vec::new(),
            pending: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn hooks(&self) -> &HookRunner {
        &self.hooks
    }

    /// Resolve the entry specifier; failure aborts startup.
    pub fn resolve_entry(&self) -> Result<PathBuf, Error> {
        let path = self
            .resolver
            .resolve(&self.config.entry, &self.root)
            .map_err(|e| Error::Entry {
                specifier: self.config.entry.clone(),
                message: format!("{e}; tried {}", join_paths(&e.searched_paths)),
            })?;
        std::fs::metadata(&path).map_err(|e| Error::Entry {
            specifier: self.config.entry.clone(),
            message: e.to_string(),
        })?;
        Ok(path)
    }

    /// Run before-run hooks once and keep their files for every build.
    pub fn cold_start(&mut self) {
        let outcome = self.hooks.run_before_run();
        let diagnostic = outcome.diagnostic();
        self.staged = outcome
            .outputs
            .into_iter()
            .flat_map(|(_, files)| files)
            .collect();
        tracing::debug!(files = self.staged.len(), "staged static files");
        if let Some(d) = diagnostic {
            if let Ok(mut pending) = self.pending.lock() {
                pending.push(d);
            }
        }
    }

    /// Full build from the entry.
    pub fn build(&self) -> Compilation {
        let start = std::time::Instant::now();
        self.resolver.clear_cache();

        let mut compilation = Compilation::default();
        let mut extra = self.take_pending();
        match self.resolver.resolve(&self.config.entry, &self.root) {
            Ok(entry_path) => {
                let entry_id = module_id(&self.root, &entry_path);
                let mut known = HashSet::from([entry_id.clone()]);
                let processed = self.expand(&mut compilation.graph, vec![entry_path], &mut known);
                compilation.entry = Some(entry_id);
                tracing::debug!(modules = processed.len(), "graph built");
            }
            Err(e) => extra.push(Diagnostic::from_resolve(&e, "(entry)")),
        }

        let compilation = self.finish(compilation, extra);
        tracing::info!(
            modules = compilation.graph.len(),
            assets = compilation.assets.len(),
            errors = compilation.summary().errors,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "build complete"
        );
        compilation
    }

    /// Recompute the modules affected by `changed` on top of `previous`.
    pub fn rebuild(&self, previous: &Compilation, changed: &[PathBuf]) -> RebuildOutcome {
        let start = std::time::Instant::now();
        let Some(entry) = previous.entry.clone() else {
            let compilation = self.build();
            return if compilation.has_errors() {
                RebuildOutcome::Failed(compilation)
            } else {
                RebuildOutcome::Updated {
                    compilation,
                    update: LiveUpdate::FullReload,
                }
            };
        };
        self.resolver.clear_cache();

        let changed_ids: Vec<String> = changed
            .iter()
            .map(|p| module_id(&self.root, &dunce::canonicalize(p).unwrap_or_else(|_| p.clone())))
            .filter(|id| previous.graph.contains(id))
            .collect();
        let template_changed = self.template_changed(changed);
        if changed_ids.is_empty() && !template_changed {
            return RebuildOutcome::Unchanged;
        }

        let mut staged = previous.clone();
        let affected = staged.graph.transitive_dependents(&changed_ids);
        let order: Vec<String> = staged
            .graph
            .toposort()
            .into_iter()
            .filter(|id| affected.contains(id))
            .collect();
        let frontier: Vec<PathBuf> = order
            .iter()
            .filter_map(|id| staged.graph.get(id).map(|m| m.path.clone()))
            .collect();

        let mut known: HashSet<String> = staged.graph.iter().map(|m| m.id.clone()).collect();
        let processed = self.expand(&mut staged.graph, frontier, &mut known);
        staged.graph.retain_reachable(&entry);

        let staged = self.finish(staged, self.take_pending());
        tracing::info!(
            changed = changed_ids.len(),
            recomputed = processed.len(),
            errors = staged.summary().errors,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rebuild complete"
        );
        if staged.has_errors() {
            return RebuildOutcome::Failed(staged);
        }

        let added = processed.iter().any(|id| !previous.graph.contains(id));
        let rewired = order.iter().any(|id| {
            match (previous.graph.get(id), staged.graph.get(id)) {
                (Some(old), Some(new)) => {
                    old.dependencies != new.dependencies || old.output_kind != new.output_kind
                }
                _ => false,
            }
        });
        let update = if template_changed
            || added
            || rewired
            || previous.entry_assets != staged.entry_assets
        {
            LiveUpdate::FullReload
        } else {
            LiveUpdate::Modules(
                order
                    .iter()
                    .filter_map(|id| {
                        let new = staged.graph.get(id)?;
                        let old = previous.graph.get(id)?;
                        (old.output != new.output).then(|| ModuleUpdate {
                            id: id.clone(),
                            output: new.output.clone(),
                        })
                    })
                    .collect(),
            )
        };
        RebuildOutcome::Updated {
            compilation: staged,
            update,
        }
    }

    fn take_pending(&self) -> Vec<Diagnostic> {
        self.pending
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default()
    }

    fn template_changed(&self, changed: &[PathBuf]) -> bool {
        let Some(html) = &self.config.plugins.html else {
            return false;
        };
        let template = self.root.join(&html.template);
        changed.iter().any(|p| {
            p == &template || dunce::canonicalize(p).is_ok_and(|c| c == template)
        })
    }

    /// Process `frontier` and everything newly reachable from it.
    ///
    /// Modules already in `known` are not revisited unless they are in the
    /// frontier. Returns the processed ids in processing order.
    fn expand(
        &self,
        graph: &mut ModuleGraph,
        mut frontier: Vec<PathBuf>,
        known: &mut HashSet<String>,
    ) -> Vec<String> {
        let mut processed_ids = Vec::new();
        let mut links: Vec<(String, BTreeMap<String, String>)> = Vec::new();
        let mut rewrites: HashMap<String, Vec<PendingRewrite>> = HashMap::new();

        while !frontier.is_empty() {
            let results: Vec<Processed> = frontier.par_iter().map(|p| self.process(p)).collect();
            let mut next = Vec::new();
            for processed in results {
                let id = processed.module.id.clone();
                let mut deps = BTreeMap::new();
                for (specifier, path) in processed.dependencies {
                    let dep_id = module_id(&self.root, &path);
                    if known.insert(dep_id.clone()) {
                        next.push(path);
                    }
                    deps.insert(specifier, dep_id);
                }
                graph.insert(processed.module);
                links.push((id.clone(), deps));
                if !processed.rewrites.is_empty() {
                    rewrites.insert(id.clone(), processed.rewrites);
                }
                processed_ids.push(id);
            }
            frontier = next;
        }

        for (id, deps) in links {
            graph.link(&id, deps);
        }
        for (id, pending) in rewrites {
            apply_rewrites(graph, &id, &pending);
        }
        processed_ids
    }

    /// Read, transform and scan one module.
    fn process(&self, path: &Path) -> Processed {
        let id = module_id(&self.root, path);
        let kind = ModuleKind::from_path(path);
        let rule = self.rules.find(path);

        let mut module = Module {
            id: id.clone(),
            path: path.to_path_buf(),
            kind,
            source: Vec::new(),
            loaders: rule.map(crate::loader::Rule::chain_names).unwrap_or_default(),
            output: String::new(),
            output_kind: kind.default_output(),
            reference: None,
            emitted: None,
            dependencies: BTreeMap::new(),
            dependents: BTreeSet::new(),
            diagnostics: Vec::new(),
        };

        match std::fs::read(path) {
            Ok(bytes) => module.source = bytes,
            Err(e) => {
                let request = module.request();
                module.diagnostics.push(
                    Diagnostic::error(
                        DiagnosticKind::Compile,
                        "Module not readable",
                        format!("{}: {e}", path.display()),
                    )
                    .with_file(request),
                );
                return Processed::leaf(module);
            }
        }

        match rule.map(|r| &r.action) {
            Some(RuleAction::Asset(asset)) => self.asset_output(&mut module, Some(asset)),
            Some(RuleAction::Chain(steps)) => {
                let input = String::from_utf8_lossy(&module.source).into_owned();
                let request = module.request();
                match run_chain(steps, input, path, &self.root) {
                    Ok(out) => {
                        module.output = out.code;
                        if let Some(k) = out.kind {
                            module.output_kind = k;
                        }
                        module.diagnostics.extend(out.warnings.into_iter().map(|w| {
                            Diagnostic::warning(DiagnosticKind::Compile, "Module warning", w)
                                .with_file(request.clone())
                        }));
                    }
                    Err(e) => {
                        tracing::debug!(module = %id, step = %e.step, "transform failed");
                        module.diagnostics.push(Diagnostic::from_compile(&e, &request));
                        return Processed::leaf(module);
                    }
                }
            }
            None => match kind {
                ModuleKind::Image | ModuleKind::Other => self.asset_output(&mut module, None),
                ModuleKind::Script | ModuleKind::Style => {
                    module.output = String::from_utf8_lossy(&module.source).into_owned();
                }
            },
        }

        if module.output_kind == OutputKind::Asset {
            return Processed::leaf(module);
        }

        let found = if kind == ModuleKind::Style {
            scan_style(&module.output)
        } else {
            scan_script(&module.output)
        };
        let from_dir = path.parent().unwrap_or(&self.root);
        let mut dependencies: Vec<(String, PathBuf)> = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut rewrites = Vec::new();
        for dep in found {
            if failed.contains(&dep.specifier) {
                continue;
            }
            if !dependencies.iter().any(|(s, _)| s == &dep.specifier) {
                let request = if kind == ModuleKind::Style {
                    style_request(&dep.specifier)
                } else {
                    dep.specifier.clone()
                };
                match self.resolver.resolve(&request, from_dir) {
                    Ok(p) => dependencies.push((dep.specifier.clone(), p)),
                    Err(e) => {
                        module.diagnostics.push(Diagnostic::from_resolve(&e, &id));
                        failed.insert(dep.specifier);
                        continue;
                    }
                }
            }
            let Dependency {
                specifier,
                kind: dep_kind,
                span,
                statement,
            } = dep;
            if matches!(dep_kind, DependencyKind::CssUrl | DependencyKind::CssImport) {
                rewrites.push(PendingRewrite {
                    specifier,
                    kind: dep_kind,
                    span,
                    statement,
                });
            }
        }

        Processed {
            module,
            dependencies,
            rewrites,
        }
    }

    /// Inline or emit an asset module and export its reference.
    fn asset_output(&self, module: &mut Module, rule: Option<&AssetRule>) {
        let size = module.source.len() as u64;
        let (inline, template) = match rule {
            Some(asset) => (asset.inlines(size), asset.name.as_str()),
            None if module.kind == ModuleKind::Image => (false, DEFAULT_IMAGE_NAME),
            None => (false, DEFAULT_ASSET_NAME),
        };
        let reference = if inline {
            data_uri(&module.path, &module.source)
        } else {
            let name = render_name(template, &module.path, &module.source);
            let url = self.config.output.public_url(&name);
            module.emitted = Some(name);
            url
        };
        module.output = format!("module.exports = {};", json_string(&reference));
        module.output_kind = OutputKind::Asset;
        module.reference = Some(reference);
    }

    /// Bundles, emitted files, hints and hooks.
    fn finish(&self, mut c: Compilation, extra: Vec<Diagnostic>) -> Compilation {
        let order = c.graph.toposort();
        c.assets.clear();
        c.entry_assets.clear();
        c.diagnostics = extra;
        c.diagnostics.extend(
            order
                .iter()
                .filter_map(|id| c.graph.get(id))
                .flat_map(|m| m.diagnostics.iter().cloned()),
        );

        if let Some(entry) = c.entry.clone() {
            let output = &self.config.output;
            let script_name = output.script_name();
            let script = script_bundle(&c.graph, &order, &entry);
            c.emit_asset(&script_name, Asset::new(script.into_bytes(), AssetOrigin::Bundle));
            c.entry_assets.push(script_name);
            if let Some(css) = style_bundle(&c.graph, &order) {
                let style_name = output.style_name();
                c.emit_asset(&style_name, Asset::new(css.into_bytes(), AssetOrigin::Bundle));
                c.entry_assets.push(style_name);
            }

            let emitted: Vec<(String, Asset)> = c
                .graph
                .iter()
                .filter_map(|m| {
                    let name = m.emitted.clone()?;
                    Some((name, Asset::new(m.source.clone(), AssetOrigin::Module(m.id.clone()))))
                })
                .collect();
            for (name, asset) in emitted {
                c.emit_asset(&name, asset);
            }
        }

        for file in &self.staged {
            c.emit_asset(&file.name, Asset::new(file.bytes.clone(), AssetOrigin::Static));
        }

        if self.config.performance.hints {
            let limit = self.config.performance.max_asset_size;
            let oversized: Vec<(String, usize)> = c
                .assets
                .iter()
                .filter(|(_, a)| a.bytes.len() as u64 > limit)
                .map(|(name, a)| (name.clone(), a.bytes.len()))
                .collect();
            for (name, size) in oversized {
                c.diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::Performance,
                        "asset size limit",
                        format!("{name} is {size} bytes, above the {limit} byte limit"),
                    )
                    .with_file(name),
                );
            }
        }

        if !c.has_errors() {
            let outcome = self.hooks.run_emit(&c);
            let failure = outcome.diagnostic();
            for (plugin, files) in outcome.outputs {
                for file in files {
                    c.emit_asset(&file.name, Asset::new(file.bytes, AssetOrigin::Plugin(plugin.clone())));
                }
            }
            c.diagnostics.extend(failure);
        }

        if !c.has_errors() {
            let failure = self.hooks.run_compile_success(&c).diagnostic();
            c.diagnostics.extend(failure);
        }
        // A failed success hook makes this an error batch too
        if c.has_errors() {
            let failure = self.hooks.run_compile_error(&c.diagnostics).diagnostic();
            c.diagnostics.extend(failure);
        }
        c
    }
}

/// Request for a stylesheet reference: `~pkg` names a module, anything else
/// is relative to the stylesheet.
fn style_request(specifier: &str) -> String {
    if let Some(module) = specifier.strip_prefix('~') {
        module.to_string()
    } else if specifier.starts_with('.') || specifier.starts_with('/') {
        specifier.to_string()
    } else {
        format!("./{specifier}")
    }
}

/// Substitute asset references and drop bundled `@import`s.
fn apply_rewrites(graph: &mut ModuleGraph, id: &str, pending: &[PendingRewrite]) {
    let Some(module) = graph.get(id) else {
        return;
    };
    let edits: Vec<(Range<usize>, String)> = pending
        .iter()
        .filter_map(|r| {
            let target = graph.get(module.dependencies.get(&r.specifier)?)?;
            match r.kind {
                DependencyKind::CssUrl => {
                    Some((r.span.clone(), target.reference.clone()?))
                }
                DependencyKind::CssImport if target.output_kind != OutputKind::Asset => {
                    Some((r.statement.clone(), String::new()))
                }
                _ => None,
            }
        })
        .collect();
    if edits.is_empty() {
        return;
    }
    let output = rewrite(&module.output, edits);
    if let Some(module) = graph.get_mut(id) {
        module.output = output;
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::plugin::HookContext;
    use std::fs;
    use tempfile::tempdir;

    fn compiler(root: &Path, config: PipelineConfig) -> Compiler {
        let hooks = HookRunner::new(HookContext {
            root: root.to_path_buf(),
            project_name: "test".to_string(),
            output: config.output.clone(),
            dev: false,
            hot: false,
        });
        Compiler::new(root, config, &LoaderRegistry::with_builtins(), hooks).unwrap()
    }

    fn js_config() -> PipelineConfig {
        PipelineConfig {
            entry: "./src/main.js".to_string(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_style_request() {
        assert_eq!(style_request("~pkg/a.css"), "pkg/a.css");
        assert_eq!(style_request("img/a.png"), "./img/a.png");
        assert_eq!(style_request("../a.png"), "../a.png");
        assert_eq!(style_request("/a.png"), "/a.png");
    }

    #[test]
    fn test_build_links_modules() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.js"), "var a = require('./a');").unwrap();
        fs::write(dir.path().join("src/a.js"), "module.exports = 1;").unwrap();

        let c = compiler(dir.path(), js_config()).build();
        assert!(!c.has_errors(), "{:?}", c.diagnostics);
        assert_eq!(c.entry.as_deref(), Some("src/main.js"));
        assert_eq!(c.graph.len(), 2);
        let main = c.graph.get("src/main.js").unwrap();
        assert_eq!(main.dependencies.get("./a").map(String::as_str), Some("src/a.js"));
        assert!(c.asset("main.js").is_some());
        assert_eq!(c.entry_assets, vec!["main.js".to_string()]);
    }

    #[test]
    fn test_missing_import_is_reported_on_importer() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.js"), "require('./gone');").unwrap();

        let c = compiler(dir.path(), js_config()).build();
        assert!(c.has_errors());
        let err = c.errors().next().unwrap();
        assert_eq!(err.title, "Module not found: './gone'");
    }

    #[test]
    fn test_missing_entry_is_a_diagnostic() {
        let dir = tempdir().unwrap();
        let compiler = compiler(dir.path(), js_config());
        assert!(matches!(compiler.resolve_entry(), Err(Error::Entry { .. })));
        let c = compiler.build();
        assert!(c.entry.is_none());
        assert!(c.has_errors());
        assert!(c.assets.is_empty());
    }

    #[test]
    fn test_emitted_image_rewrites_css_url() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.js"), "require('./app.css');").unwrap();
        fs::write(
            dir.path().join("src/app.css"),
            ".logo { background: url(./logo.png); }\n",
        )
        .unwrap();
        fs::write(dir.path().join("src/logo.png"), b"hello world").unwrap();

        let mut config = js_config();
        config.module.rules = vec![
            RuleConfig::with_loader(r"\.css$", "css"),
            RuleConfig {
                options: Some(serde_json::json!({ "limit": 1 })),
                ..RuleConfig::with_loader(r"\.png$", "url")
            },
        ];
        let c = compiler(dir.path(), config).build();
        assert!(!c.has_errors(), "{:?}", c.diagnostics);

        let css = String::from_utf8_lossy(&c.asset("main.css").unwrap().bytes).into_owned();
        assert!(css.contains("/img/logo.d74981e.png"), "{css}");
        assert!(c.asset("img/logo.d74981e.png").is_some());
    }

    #[test]
    fn test_rebuild_unrelated_path_is_unchanged() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.js"), "module.exports = 1;").unwrap();
        let compiler = compiler(dir.path(), js_config());
        let c = compiler.build();
        let outcome = compiler.rebuild(&c, &[dir.path().join("README.md")]);
        assert!(matches!(outcome, RebuildOutcome::Unchanged));
    }
}

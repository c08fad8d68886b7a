//! Loader pipeline.
//!
//! A [`Loader`] is one content transform (`sass`, `css`, `style`, an external
//! toolchain...). Rules from the configuration select a chain of loaders per
//! file; [`run_chain`] applies the chain last-to-first and reports the first
//! failing step as a [`CompileError`].

mod builtin;
mod external;
mod rule;

pub use builtin::{CssLoader, JsonLoader, RawLoader, SassLoader, StyleLoader};
pub use external::CommandLoader;
pub use rule::{AssetRule, AssetRuleKind, LoaderStep, Rule, RuleAction, RuleSet};

use crate::config::ExternalLoaderConfig;
use crate::error::Error;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a module's output is once its chain has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// JavaScript, bundled into the script bundle.
    Script,
    /// CSS, concatenated into the style bundle.
    Stylesheet,
    /// A standalone emitted file (or inline reference).
    Asset,
}

/// A single transform failed. Partial chain output is discarded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{step} failed for {}: {message}", path.display())]
pub struct CompileError {
    pub path: PathBuf,
    /// Loader name of the failing step.
    pub step: String,
    pub message: String,
}

/// Error returned by a loader's transform.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct LoaderError(pub String);

impl LoaderError {
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Per-invocation context handed to a loader.
#[derive(Debug)]
pub struct LoaderContext<'a> {
    /// Absolute path of the module being transformed.
    pub resource: &'a Path,
    /// Project root.
    pub root: &'a Path,
    /// Options attached to this step in the rule.
    pub options: &'a serde_json::Value,
    /// Non-fatal messages collected during the transform.
    pub warnings: Vec<String>,
}

impl LoaderContext<'_> {
    /// Record a non-fatal warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Boolean option, defaulting to `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.options
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// A content transform.
pub trait Loader: Send + Sync + std::fmt::Debug {
    /// Short name, without the `-loader` suffix.
    fn name(&self) -> &str;

    /// Output kind this loader produces, if it changes the kind.
    fn produces(&self) -> Option<OutputKind> {
        None
    }

    /// Transform `input` into new source text.
    fn transform(&self, input: &str, ctx: &mut LoaderContext<'_>) -> Result<String, LoaderError>;
}

/// Successful chain result.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub code: String,
    /// Kind from the last applied loader that declares one.
    pub kind: Option<OutputKind>,
    pub warnings: Vec<String>,
}

/// Apply `steps` right-to-left to `input`.
pub fn run_chain(
    steps: &[LoaderStep],
    input: String,
    resource: &Path,
    root: &Path,
) -> Result<ChainOutput, CompileError> {
    let mut code = input;
    let mut kind = None;
    let mut warnings = Vec::new();

    for step in steps.iter().rev() {
        let mut ctx = LoaderContext {
            resource,
            root,
            options: &step.options,
            warnings: Vec::new(),
        };
        code = step
            .loader
            .transform(&code, &mut ctx)
            .map_err(|e| CompileError {
                path: resource.to_path_buf(),
                step: step.name.clone(),
                message: e.0,
            })?;
        if let Some(k) = step.loader.produces() {
            kind = Some(k);
        }
        warnings.extend(
            ctx.warnings
                .into_iter()
                .map(|w| format!("{}: {w}", step.name)),
        );
    }

    Ok(ChainOutput {
        code,
        kind,
        warnings,
    })
}

/// Strip a trailing `-loader` from a loader reference.
#[must_use]
pub fn normalize_loader_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_suffix("-loader").unwrap_or(name)
}

/// Named loaders available to rules.
#[derive(Debug, Clone, Default)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl LoaderRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in loaders.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SassLoader));
        registry.register(Arc::new(CssLoader));
        registry.register(Arc::new(StyleLoader));
        registry.register(Arc::new(JsonLoader));
        registry.register(Arc::new(RawLoader));
        registry
    }

    /// Built-ins plus the external commands declared in the configuration.
    pub fn from_config(external: &BTreeMap<String, ExternalLoaderConfig>) -> Result<Self, Error> {
        let mut registry = Self::with_builtins();
        for (name, config) in external {
            let loader = CommandLoader::from_config(normalize_loader_name(name), config)?;
            registry.register(Arc::new(loader));
        }
        Ok(registry)
    }

    /// Add or replace a loader under its own name.
    pub fn register(&mut self, loader: Arc<dyn Loader>) {
        self.loaders.insert(loader.name().to_string(), loader);
    }

    /// Look up a loader by (normalized) name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Loader>> {
        self.loaders.get(normalize_loader_name(name)).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.loaders.keys().cloned().collect();
        names.sort();
        names
    }
}
